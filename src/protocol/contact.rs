//! Contact Types
//!
//! Collision and ground descriptions published by the collision notifier.
//! Normals point from the other shape toward the entity, so a floor contact
//! has normal `UP` (`-Y`).

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::core::aabb::UP;
use crate::core::time::Seconds;
use crate::protocol::ids::{ColliderId, EntityId};

/// Behavioral class of a surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// Regular ground
    #[default]
    Normal,
    /// Ice-like, barely decelerates
    Slippery,
    /// Reflects impact velocity
    Bouncy,
    /// Solid only from above
    OneWay,
}

impl SurfaceKind {
    /// Default friction coefficient for the kind.
    pub fn default_friction(self) -> f32 {
        match self {
            Self::Normal => 0.3,
            Self::Slippery => 0.02,
            Self::Bouncy => 0.3,
            Self::OneWay => 0.3,
        }
    }

    /// Default restitution for the kind.
    pub fn default_restitution(self) -> f32 {
        match self {
            Self::Normal => 0.0,
            Self::Slippery => 0.0,
            Self::Bouncy => 0.8,
            Self::OneWay => 0.0,
        }
    }
}

/// Surface material a contact happened on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceDescriptor {
    /// Behavioral class
    pub kind: SurfaceKind,
    /// Material name for audio/effects ("stone", "ice", "grass", ...)
    pub material: String,
    /// Friction coefficient (≥ 0)
    pub friction: f32,
    /// Restitution (≥ 0)
    pub restitution: f32,
}

impl SurfaceDescriptor {
    /// Descriptor with the kind's default friction and restitution.
    pub fn new(kind: SurfaceKind, material: impl Into<String>) -> Self {
        Self {
            kind,
            material: material.into(),
            friction: kind.default_friction(),
            restitution: kind.default_restitution(),
        }
    }

    /// Regular stone ground.
    pub fn stone() -> Self {
        Self::new(SurfaceKind::Normal, "stone")
    }

    /// Slippery ice.
    pub fn ice() -> Self {
        Self::new(SurfaceKind::Slippery, "ice")
    }

    /// Bouncy mushroom cap.
    pub fn bouncy() -> Self {
        Self::new(SurfaceKind::Bouncy, "mushroom")
    }

    /// Wooden one-way platform.
    pub fn one_way() -> Self {
        Self::new(SurfaceKind::OneWay, "wood")
    }
}

impl Default for SurfaceDescriptor {
    fn default() -> Self {
        Self::stone()
    }
}

/// What kind of thing was touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionType {
    /// Walkable surface below
    Ground,
    /// Near-vertical surface
    Wall,
    /// Surface above
    Ceiling,
    /// Another body
    Entity,
    /// Collectible volume
    Pickup,
    /// Script trigger volume
    Trigger,
    /// Hazard volume
    Damage,
    /// Walkable one-way or moving platform
    Platform,
}

impl CollisionType {
    /// True for contacts the entity can stand on.
    #[inline]
    pub fn is_standable(self) -> bool {
        matches!(self, Self::Ground | Self::Platform)
    }

    /// True for contacts that are reported but never resolved.
    #[inline]
    pub fn is_sensor(self) -> bool {
        matches!(self, Self::Pickup | Self::Trigger | Self::Damage | Self::Entity)
    }

    /// Sentinel id used for static geometry of this type.
    pub fn sentinel(self) -> EntityId {
        match self {
            Self::Ground => EntityId::GROUND,
            Self::Wall => EntityId::WALL,
            Self::Ceiling => EntityId::CEILING,
            Self::Platform => EntityId::PLATFORM,
            Self::Entity | Self::Pickup | Self::Trigger | Self::Damage => EntityId::SENSOR,
        }
    }
}

impl fmt::Display for CollisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ground => "ground",
            Self::Wall => "wall",
            Self::Ceiling => "ceiling",
            Self::Entity => "entity",
            Self::Pickup => "pickup",
            Self::Trigger => "trigger",
            Self::Damage => "damage",
            Self::Platform => "platform",
        };
        f.write_str(name)
    }
}

/// A single contact between an entity and something else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionInfo {
    /// The body this contact belongs to
    pub entity_a: EntityId,
    /// Other body, or a sentinel for static geometry
    pub entity_b: EntityId,
    /// Static collider involved, if any
    pub collider: Option<ColliderId>,
    /// Contact point in world space
    pub contact_point: Vec2,
    /// Unit normal pointing from `entity_b` toward `entity_a`
    pub normal: Vec2,
    /// Overlap depth (≤ 0 for touching-but-separated contacts)
    pub penetration: f32,
    /// Translation that separated (or would separate) the shapes
    pub separation: Vec2,
    /// Classification
    pub collision_type: CollisionType,
    /// Surface of the other shape
    pub surface: SurfaceDescriptor,
    /// Simulation time of detection
    pub timestamp: Seconds,
    /// Still in contact
    pub active: bool,
    /// Speed along the normal at impact
    pub impact_velocity: f32,
}

impl CollisionInfo {
    /// Key identifying "the same contact" across ticks.
    #[inline]
    pub fn key(&self) -> ContactKey {
        ContactKey {
            other: self.entity_b,
            collider: self.collider,
        }
    }

    /// True when the other shape is below the entity.
    #[inline]
    pub fn is_below(&self) -> bool {
        self.normal.dot(UP) > 0.0
    }
}

/// Identity of a contact for start/end tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactKey {
    /// Other body or sentinel
    pub other: EntityId,
    /// Static collider, if any
    pub collider: Option<ColliderId>,
}

/// Grounded status of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundInfo {
    /// Entity described
    pub entity: EntityId,
    /// Standing on walkable ground this tick
    pub grounded: bool,
    /// Normal of the ground (UP when airborne)
    pub ground_normal: Vec2,
    /// Last time the entity was grounded (None if never)
    pub last_grounded_at: Option<Seconds>,
    /// Remaining coyote window in seconds
    pub coyote_time_remaining: Seconds,
    /// Surface stood on (last known while airborne)
    pub surface: Option<SurfaceDescriptor>,
    /// Grounded on the previous tick
    pub was_grounded: bool,
    /// Velocity of the platform stood on (zero for static ground)
    pub platform_velocity: Vec2,
    /// Platform is not moving
    pub platform_stable: bool,
}

impl GroundInfo {
    /// Airborne entity that has never touched ground.
    pub fn airborne(entity: EntityId) -> Self {
        Self {
            entity,
            grounded: false,
            ground_normal: UP,
            last_grounded_at: None,
            coyote_time_remaining: 0.0,
            surface: None,
            was_grounded: false,
            platform_velocity: Vec2::ZERO,
            platform_stable: true,
        }
    }

    /// Landed this tick.
    #[inline]
    pub fn just_landed(&self) -> bool {
        self.grounded && !self.was_grounded
    }

    /// Left the ground this tick.
    #[inline]
    pub fn just_left_ground(&self) -> bool {
        !self.grounded && self.was_grounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_defaults_are_distinct() {
        let stone = SurfaceDescriptor::stone();
        let ice = SurfaceDescriptor::ice();
        let bouncy = SurfaceDescriptor::bouncy();
        assert!(ice.friction < stone.friction);
        assert!(bouncy.restitution > stone.restitution);
        assert_eq!(SurfaceDescriptor::one_way().kind, SurfaceKind::OneWay);
    }

    #[test]
    fn test_collision_type_classes() {
        assert!(CollisionType::Ground.is_standable());
        assert!(CollisionType::Platform.is_standable());
        assert!(!CollisionType::Wall.is_standable());
        assert!(CollisionType::Pickup.is_sensor());
        assert!(!CollisionType::Ceiling.is_sensor());
        assert_eq!(CollisionType::Wall.sentinel(), EntityId::WALL);
    }

    #[test]
    fn test_ground_transitions() {
        let mut info = GroundInfo::airborne(EntityId(1));
        info.grounded = true;
        assert!(info.just_landed());
        info.was_grounded = true;
        info.grounded = false;
        assert!(info.just_left_ground());
    }
}
