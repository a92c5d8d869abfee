//! Body Definitions
//!
//! `BodyDef` is what the level loader hands over on registration. `Body` is
//! the coordinator's private live record; nothing outside the physics
//! module can reach its position or velocity mutably.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PhysicsConfig;
use crate::core::time::Seconds;
use crate::protocol::ids::EntityId;
use crate::protocol::state::PhysicsState;

/// Errors from fallible administrative physics operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    /// No body registered under this id
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Sentinel ids cannot own bodies
    #[error("entity {0} is a reserved sentinel id")]
    SentinelEntity(EntityId),

    /// Mass must be positive and finite
    #[error("invalid mass {0} (must be > 0)")]
    InvalidMass(f32),

    /// Collision box must have positive finite extents
    #[error("invalid half extents {0:?}")]
    InvalidExtents(Vec2),

    /// Non-finite position, velocity or scale
    #[error("body definition contains non-finite values")]
    NonFinite,

    /// Material values out of range
    #[error("invalid material friction={friction} restitution={restitution}")]
    InvalidMaterial {
        /// Requested friction
        friction: f32,
        /// Requested restitution
        restitution: f32,
    },
}

/// Registration parameters for a body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyDef {
    /// Initial center position
    pub position: Vec2,
    /// Half width/height of the collision box
    pub half_extents: Vec2,
    /// Initial velocity
    pub velocity: Vec2,
    /// Mass (> 0)
    pub mass: f32,
    /// Multiplier on world gravity
    pub gravity_scale: f32,
    /// Gravity applies
    pub gravity_enabled: bool,
    /// Never integrated
    pub is_static: bool,
}

impl BodyDef {
    /// Dynamic body at `position` with the given box.
    pub fn dynamic(position: Vec2, half_extents: Vec2) -> Self {
        Self {
            position,
            half_extents,
            velocity: Vec2::ZERO,
            mass: 1.0,
            gravity_scale: 1.0,
            gravity_enabled: true,
            is_static: false,
        }
    }

    /// Static (non-integrated) body.
    pub fn fixed(position: Vec2, half_extents: Vec2) -> Self {
        Self {
            is_static: true,
            gravity_enabled: false,
            ..Self::dynamic(position, half_extents)
        }
    }

    /// Copy with a mass.
    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// Copy with gravity disabled (flying / swimming bodies).
    pub fn without_gravity(mut self) -> Self {
        self.gravity_enabled = false;
        self
    }

    /// Copy with a gravity multiplier.
    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    /// Copy with an initial velocity.
    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    /// Reject definitions that would corrupt the simulation.
    pub fn validate(&self, entity: EntityId) -> Result<(), PhysicsError> {
        if entity.is_sentinel() {
            return Err(PhysicsError::SentinelEntity(entity));
        }
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(PhysicsError::InvalidMass(self.mass));
        }
        if !(self.half_extents.is_finite() && self.half_extents.x > 0.0 && self.half_extents.y > 0.0) {
            return Err(PhysicsError::InvalidExtents(self.half_extents));
        }
        if !(self.position.is_finite() && self.velocity.is_finite() && self.gravity_scale.is_finite()) {
            return Err(PhysicsError::NonFinite);
        }
        Ok(())
    }
}

/// Live per-entity record owned by the physics coordinator.
#[derive(Clone, Debug)]
pub(crate) struct Body {
    pub(crate) state: PhysicsState,
    /// Horizontal motion was driven by a request this tick (no friction)
    pub(crate) driven: bool,
}

impl Body {
    pub(crate) fn new(entity: EntityId, def: &BodyDef, config: &PhysicsConfig, now: Seconds) -> Self {
        Self {
            state: PhysicsState {
                entity,
                position: def.position,
                velocity: def.velocity,
                acceleration: Vec2::ZERO,
                half_extents: def.half_extents,
                mass: def.mass,
                gravity_scale: def.gravity_scale,
                friction: config.default_friction,
                restitution: config.default_restitution,
                is_static: def.is_static,
                gravity_enabled: def.gravity_enabled,
                grounded: false,
                was_grounded: false,
                collisions: Vec::new(),
                accumulated_forces: Vec2::ZERO,
                contact_points: 0,
                update_counter: 0,
                last_update: now,
            },
            driven: false,
        }
    }

    /// Record a mutation.
    #[inline]
    pub(crate) fn touch(&mut self, now: Seconds) {
        self.state.update_counter += 1;
        self.state.last_update = now;
    }
}
