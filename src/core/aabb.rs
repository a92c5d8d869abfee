//! Axis-Aligned Bounding Boxes
//!
//! Collision shapes for bodies and static geometry. Uses the engine's
//! screen-space convention: +X right, +Y down, so "up" is `-Y`.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// World-space up direction (+Y points down).
pub const UP: Vec2 = Vec2::new(0.0, -1.0);

/// World-space down direction.
pub const DOWN: Vec2 = Vec2::new(0.0, 1.0);

/// Axis-aligned box stored as center + half extents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Box center
    pub center: Vec2,
    /// Half width / half height (both > 0)
    pub half_extents: Vec2,
}

/// Axis a minimum translation vector was taken along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// Horizontal separation
    X,
    /// Vertical separation
    Y,
}

/// Minimum translation vector separating two overlapping boxes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Separation {
    /// Unit normal pointing from the other box toward this one
    pub normal: Vec2,
    /// Overlap along the normal (> 0 while penetrating)
    pub depth: f32,
    /// Axis of least overlap
    pub axis: Axis,
}

impl Separation {
    /// Translation that pushes this box out of the other one.
    #[inline]
    pub fn vector(&self) -> Vec2 {
        self.normal * self.depth
    }
}

impl Aabb {
    /// Create from center and half extents.
    #[inline]
    pub const fn new(center: Vec2, half_extents: Vec2) -> Self {
        Self { center, half_extents }
    }

    /// Create from min and max corners.
    #[inline]
    pub fn from_min_max(min: Vec2, max: Vec2) -> Self {
        Self {
            center: (min + max) * 0.5,
            half_extents: (max - min) * 0.5,
        }
    }

    /// Minimum corner (left, top).
    #[inline]
    pub fn min(&self) -> Vec2 {
        self.center - self.half_extents
    }

    /// Maximum corner (right, bottom).
    #[inline]
    pub fn max(&self) -> Vec2 {
        self.center + self.half_extents
    }

    /// Top edge (smallest y).
    #[inline]
    pub fn top(&self) -> f32 {
        self.center.y - self.half_extents.y
    }

    /// Bottom edge (largest y).
    #[inline]
    pub fn bottom(&self) -> f32 {
        self.center.y + self.half_extents.y
    }

    /// Same box moved by `offset`.
    #[inline]
    pub fn translated(&self, offset: Vec2) -> Self {
        Self::new(self.center + offset, self.half_extents)
    }

    /// Same box centered at `center`.
    #[inline]
    pub fn at(&self, center: Vec2) -> Self {
        Self::new(center, self.half_extents)
    }

    /// Box grown by `margin` on every side.
    #[inline]
    pub fn expanded(&self, margin: f32) -> Self {
        Self::new(self.center, self.half_extents + Vec2::splat(margin))
    }

    /// All components finite and extents positive.
    pub fn is_valid(&self) -> bool {
        self.center.is_finite()
            && self.half_extents.is_finite()
            && self.half_extents.x > 0.0
            && self.half_extents.y > 0.0
    }

    /// Signed overlap per axis. Positive components mean the projections
    /// intersect by that amount; negative is the gap between them.
    #[inline]
    pub fn overlap(&self, other: &Aabb) -> Vec2 {
        let (a_min, a_max) = (self.min(), self.max());
        let (b_min, b_max) = (other.min(), other.max());
        Vec2::new(
            a_max.x.min(b_max.x) - a_min.x.max(b_min.x),
            a_max.y.min(b_max.y) - a_min.y.max(b_min.y),
        )
    }

    /// Strict intersection test (touching edges do not count).
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        let o = self.overlap(other);
        o.x > 0.0 && o.y > 0.0
    }

    /// Minimum translation vector along the axis of least overlap.
    ///
    /// Ties resolve vertically so boxes resting on seams separate upward.
    pub fn mtv(&self, other: &Aabb) -> Option<Separation> {
        let o = self.overlap(other);
        if o.x <= 0.0 || o.y <= 0.0 {
            return None;
        }

        if o.x < o.y {
            let sign = if self.center.x < other.center.x { -1.0 } else { 1.0 };
            Some(Separation {
                normal: Vec2::new(sign, 0.0),
                depth: o.x,
                axis: Axis::X,
            })
        } else {
            let sign = if self.center.y < other.center.y { -1.0 } else { 1.0 };
            Some(Separation {
                normal: Vec2::new(0.0, sign),
                depth: o.y,
                axis: Axis::Y,
            })
        }
    }

    /// Closest point on this box to `point`.
    #[inline]
    pub fn closest_point(&self, point: Vec2) -> Vec2 {
        point.clamp(self.min(), self.max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32, y: f32) -> Aabb {
        Aabb::new(Vec2::new(x, y), Vec2::splat(1.0))
    }

    #[test]
    fn test_overlap_and_intersects() {
        let a = unit_box(0.0, 0.0);
        let b = unit_box(1.5, 0.0);
        let o = a.overlap(&b);
        assert!((o.x - 0.5).abs() < 1e-6);
        assert!((o.y - 2.0).abs() < 1e-6);
        assert!(a.intersects(&b));

        // Touching edges do not intersect
        let c = unit_box(2.0, 0.0);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_mtv_least_overlap_axis() {
        let a = unit_box(0.0, 0.0);
        let b = unit_box(1.5, 0.2);
        let sep = a.mtv(&b).unwrap();
        assert_eq!(sep.axis, Axis::X);
        assert_eq!(sep.normal, Vec2::new(-1.0, 0.0));
        assert!((sep.depth - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mtv_pushes_up_when_resting_on_top() {
        // Entity slightly sunk into a wide floor below it (+Y is down)
        let entity = unit_box(0.0, 0.0);
        let floor = Aabb::from_min_max(Vec2::new(-10.0, 0.9), Vec2::new(10.0, 5.0));
        let sep = entity.mtv(&floor).unwrap();
        assert_eq!(sep.axis, Axis::Y);
        assert_eq!(sep.normal, UP);
        assert!((sep.depth - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_mtv_none_when_separated() {
        assert!(unit_box(0.0, 0.0).mtv(&unit_box(5.0, 0.0)).is_none());
    }

    #[test]
    fn test_validity() {
        assert!(unit_box(0.0, 0.0).is_valid());
        assert!(!Aabb::new(Vec2::ZERO, Vec2::ZERO).is_valid());
        assert!(!Aabb::new(Vec2::new(f32::NAN, 0.0), Vec2::ONE).is_valid());
    }
}
