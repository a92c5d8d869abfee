//! Static Level Geometry
//!
//! Solid blocks, one-way platforms, sensor volumes and moving platforms.
//! Levels are built by the loader (or tests) before the simulation runs;
//! only moving platforms change afterwards, and only through `advance`.

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::core::aabb::Aabb;
use crate::core::time::Seconds;
use crate::protocol::contact::{CollisionType, SurfaceDescriptor};
use crate::protocol::ids::ColliderId;

/// How a collider interacts with bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColliderKind {
    /// Blocks from every side
    Solid,
    /// Blocks only bodies falling onto its top face
    OneWay,
    /// Reported as a contact of the given type, never resolved
    Sensor(CollisionType),
}

impl ColliderKind {
    /// True when the collider pushes bodies out.
    #[inline]
    pub fn is_blocking(self) -> bool {
        !matches!(self, Self::Sensor(_))
    }
}

/// Back-and-forth motion between two centers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformPath {
    /// First endpoint
    pub from: Vec2,
    /// Second endpoint
    pub to: Vec2,
    /// Travel speed (pixels/s)
    pub speed: f32,
    /// Heading toward `to`
    pub forward: bool,
}

impl PlatformPath {
    fn target(&self) -> Vec2 {
        if self.forward {
            self.to
        } else {
            self.from
        }
    }
}

/// One piece of static geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticCollider {
    /// Collider id
    pub id: ColliderId,
    /// Current bounds
    pub bounds: Aabb,
    /// Interaction kind
    pub kind: ColliderKind,
    /// Surface material
    pub surface: SurfaceDescriptor,
    /// Velocity during the last advance (zero for fixed geometry)
    pub velocity: Vec2,
    /// Path for moving platforms
    pub path: Option<PlatformPath>,
}

impl StaticCollider {
    /// True for platforms that move.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.path.is_some()
    }

    /// Advance along the path; returns the displacement applied.
    fn advance(&mut self, dt: f32) -> Vec2 {
        let Some(path) = self.path.as_mut() else {
            return Vec2::ZERO;
        };

        let start = self.bounds.center;
        let mut remaining = path.speed * dt;
        let mut center = start;
        // At most two legs per step: reach an endpoint, turn around
        for _ in 0..2 {
            let to_target = path.target() - center;
            let distance = to_target.length();
            if distance <= remaining {
                center = path.target();
                remaining -= distance;
                path.forward = !path.forward;
            } else {
                center += to_target / distance * remaining;
                break;
            }
        }

        self.bounds.center = center;
        let delta = center - start;
        self.velocity = if dt > 0.0 { delta / dt } else { Vec2::ZERO };
        delta
    }
}

/// All static geometry of a level, ordered by id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticWorld {
    colliders: BTreeMap<ColliderId, StaticCollider>,
    next_id: u32,
}

impl StaticWorld {
    /// Empty world.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, bounds: Aabb, kind: ColliderKind, surface: SurfaceDescriptor) -> ColliderId {
        let id = ColliderId(self.next_id);
        self.next_id += 1;
        self.colliders.insert(
            id,
            StaticCollider {
                id,
                bounds,
                kind,
                surface,
                velocity: Vec2::ZERO,
                path: None,
            },
        );
        id
    }

    /// Add a solid block.
    pub fn add_solid(&mut self, bounds: Aabb, surface: SurfaceDescriptor) -> ColliderId {
        self.insert(bounds, ColliderKind::Solid, surface)
    }

    /// Add a platform that can be jumped through from below.
    pub fn add_one_way(&mut self, bounds: Aabb, surface: SurfaceDescriptor) -> ColliderId {
        self.insert(bounds, ColliderKind::OneWay, surface)
    }

    /// Add a sensor volume (pickup, trigger or damage zone).
    pub fn add_sensor(&mut self, bounds: Aabb, collision_type: CollisionType) -> ColliderId {
        self.insert(bounds, ColliderKind::Sensor(collision_type), SurfaceDescriptor::default())
    }

    /// Add a solid platform shuttling between `from` and `to` (centers).
    pub fn add_moving_platform(
        &mut self,
        half_extents: Vec2,
        from: Vec2,
        to: Vec2,
        speed: f32,
        surface: SurfaceDescriptor,
    ) -> ColliderId {
        let id = self.insert(Aabb::new(from, half_extents), ColliderKind::Solid, surface);
        if let Some(collider) = self.colliders.get_mut(&id) {
            collider.path = Some(PlatformPath {
                from,
                to,
                speed: speed.abs(),
                forward: true,
            });
        }
        id
    }

    /// Remove a collider.
    pub fn remove(&mut self, id: ColliderId) -> Option<StaticCollider> {
        self.colliders.remove(&id)
    }

    /// Look up a collider.
    pub fn get(&self, id: ColliderId) -> Option<&StaticCollider> {
        self.colliders.get(&id)
    }

    /// Colliders in id order.
    pub fn iter(&self) -> impl Iterator<Item = &StaticCollider> {
        self.colliders.values()
    }

    /// Colliders whose bounds come within `margin` of `bounds`.
    pub fn query(&self, bounds: &Aabb, margin: f32) -> impl Iterator<Item = &StaticCollider> {
        let probe = bounds.expanded(margin);
        self.colliders.values().filter(move |c| {
            let o = probe.overlap(&c.bounds);
            o.x >= 0.0 && o.y >= 0.0
        })
    }

    /// Number of colliders.
    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    /// True when the level has no geometry.
    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    /// Move platforms by one step. Returns each moving platform's displacement.
    pub fn advance(&mut self, dt: Seconds) -> BTreeMap<ColliderId, Vec2> {
        let dt = dt as f32;
        self.colliders
            .values_mut()
            .filter(|c| c.is_moving())
            .map(|c| (c.id, c.advance(dt)))
            .collect()
    }
}
