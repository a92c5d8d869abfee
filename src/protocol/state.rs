//! Physics State Snapshots
//!
//! `PhysicsState` is the published, read-only view of one body. Consumers
//! receive copies; the coordinator is the only writer of the live value.

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::config::AccumulationLimits;
use crate::core::aabb::Aabb;
use crate::core::hash::StateHasher;
use crate::core::time::Seconds;
use crate::protocol::contact::CollisionInfo;
use crate::protocol::ids::EntityId;

/// Full per-entity physics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicsState {
    /// Entity described
    pub entity: EntityId,
    /// Center position
    pub position: Vec2,
    /// Velocity (pixels/s)
    pub velocity: Vec2,
    /// Acceleration applied during the last step
    pub acceleration: Vec2,
    /// Half width/height of the collision box
    pub half_extents: Vec2,
    /// Mass (> 0)
    pub mass: f32,
    /// Multiplier on world gravity
    pub gravity_scale: f32,
    /// Body friction (≥ 0)
    pub friction: f32,
    /// Body restitution (≥ 0)
    pub restitution: f32,
    /// Never moved by integration
    pub is_static: bool,
    /// Gravity applies to this body
    pub gravity_enabled: bool,
    /// Standing on ground this tick
    pub grounded: bool,
    /// Standing on ground the previous tick
    pub was_grounded: bool,
    /// Active contacts
    pub collisions: Vec<CollisionInfo>,
    /// Persistent force vector (consumed each step as F/m)
    pub accumulated_forces: Vec2,
    /// Number of contact points currently tracked
    pub contact_points: usize,
    /// Increments on every mutation by the coordinator
    pub update_counter: u64,
    /// Simulation time of the last mutation
    pub last_update: Seconds,
}

/// One way a state can exceed its accumulation limits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationViolation {
    /// Accumulated force magnitude too large
    Force(f32),
    /// Friction too high
    Friction(f32),
    /// Restitution too high
    Restitution(f32),
    /// Too many contact points
    ContactPoints(usize),
    /// Velocity magnitude too large
    Velocity(f32),
    /// A numeric field is NaN or infinite
    NonFinite,
}

impl fmt::Display for AccumulationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Force(v) => write!(f, "accumulated force {v:.1}"),
            Self::Friction(v) => write!(f, "friction {v:.3}"),
            Self::Restitution(v) => write!(f, "restitution {v:.3}"),
            Self::ContactPoints(n) => write!(f, "{n} contact points"),
            Self::Velocity(v) => write!(f, "velocity {v:.1}"),
            Self::NonFinite => f.write_str("non-finite state"),
        }
    }
}

impl PhysicsState {
    /// Collision box at the current position.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.position, self.half_extents)
    }

    /// All numeric fields are finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.acceleration.is_finite()
            && self.half_extents.is_finite()
            && self.accumulated_forces.is_finite()
            && self.mass.is_finite()
            && self.gravity_scale.is_finite()
            && self.friction.is_finite()
            && self.restitution.is_finite()
            && self.last_update.is_finite()
    }

    /// Every accumulation limit this state exceeds.
    pub fn accumulation_violations(&self, limits: &AccumulationLimits) -> Vec<AccumulationViolation> {
        if !self.is_finite() {
            return vec![AccumulationViolation::NonFinite];
        }

        let mut violations = Vec::new();
        let force = self.accumulated_forces.length();
        if force > limits.max_accumulated_force {
            violations.push(AccumulationViolation::Force(force));
        }
        if self.friction > limits.max_friction {
            violations.push(AccumulationViolation::Friction(self.friction));
        }
        if self.restitution > limits.max_restitution {
            violations.push(AccumulationViolation::Restitution(self.restitution));
        }
        if self.contact_points > limits.max_contact_points {
            violations.push(AccumulationViolation::ContactPoints(self.contact_points));
        }
        let speed = self.velocity.length();
        if speed > limits.max_velocity {
            violations.push(AccumulationViolation::Velocity(speed));
        }
        violations
    }

    /// True when any accumulation limit is exceeded (or a field is non-finite).
    pub fn has_accumulation(&self, limits: &AccumulationLimits) -> bool {
        !self.accumulation_violations(limits).is_empty()
    }

    /// Ids of everything the body is touching.
    pub fn active_collision_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .collisions
            .iter()
            .filter(|c| c.active)
            .map(|c| c.entity_b)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Feed the deterministic parts of this state into a hasher.
    ///
    /// Contacts are summarized by count; they are derived from positions.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_bytes(&self.entity.0.to_le_bytes());
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_vec2(self.accumulated_forces);
        hasher.update_f32(self.friction);
        hasher.update_f32(self.restitution);
        hasher.update_bool(self.grounded);
        hasher.update_u32(self.contact_points as u32);
        hasher.update_u64(self.update_counter);
    }
}
