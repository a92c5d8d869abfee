//! Movement Requests
//!
//! The only way non-authoritative systems (input, AI, combat) ask for a
//! change to an entity's motion. Requests are immutable values; a retry or
//! a modified request is always a new value.

use std::collections::BTreeMap;
use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::aabb::UP;
use crate::core::time::{Seconds, TIME_EPSILON};
use crate::protocol::ids::{EntityId, RequestId};

/// Allowed deviation from unit length for walk/dash directions.
pub const DIRECTION_TOLERANCE: f32 = 0.01;

/// Constraint key: cap the applied speed for this request.
pub const CONSTRAINT_MAX_SPEED: &str = "max_speed";

/// Constraint key: non-zero restricts the request to its horizontal component.
pub const CONSTRAINT_HORIZONTAL_ONLY: &str = "horizontal_only";

/// Kind of movement being requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Set horizontal velocity along a unit direction
    Walk,
    /// Set upward velocity (requires ground or coyote time)
    Jump,
    /// Burst along a unit direction
    Dash,
    /// Cancel driven motion
    Stop,
    /// Add an instantaneous velocity change
    Impulse,
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Walk => "walk",
            Self::Jump => "jump",
            Self::Dash => "dash",
            Self::Stop => "stop",
            Self::Impulse => "impulse",
        };
        f.write_str(name)
    }
}

/// Request priority. Higher priorities are processed first and win
/// same-tick conflicts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    /// Background / ambient motion
    Low = 0,
    /// Regular input
    #[default]
    Normal = 1,
    /// Gameplay-critical input (abilities)
    High = 2,
    /// Overrides everything queued for the entity this tick
    Critical = 3,
}

/// Why a request failed validation.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ValidationError {
    /// Request targets a reserved static-geometry id
    #[error("entity {0} is a reserved sentinel id")]
    SentinelEntity(EntityId),

    /// Direction has NaN or infinite components
    #[error("direction is not finite")]
    NonFiniteDirection,

    /// Magnitude is NaN or infinite
    #[error("magnitude is not finite")]
    NonFiniteMagnitude,

    /// Magnitude below zero
    #[error("magnitude {0} is negative")]
    NegativeMagnitude(f32),

    /// Walk/dash direction is not (close to) unit length
    #[error("{kind} requires a unit direction, got length {length}")]
    NonUnitDirection {
        /// Offending kind
        kind: MovementKind,
        /// Actual direction length
        length: f32,
    },

    /// Direction is zero where one is required
    #[error("{kind} requires a non-zero direction")]
    ZeroDirection {
        /// Offending kind
        kind: MovementKind,
    },

    /// Jump/impulse with zero magnitude
    #[error("{kind} requires a positive magnitude")]
    NonPositiveMagnitude {
        /// Offending kind
        kind: MovementKind,
    },

    /// Timestamp is NaN or infinite
    #[error("creation timestamp is not finite")]
    NonFiniteTimestamp,
}

/// An immutable request to change an entity's motion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementRequest {
    entity: EntityId,
    kind: MovementKind,
    direction: Vec2,
    magnitude: f32,
    priority: Priority,
    created_at: Seconds,
    request_id: Option<RequestId>,
    constraints: BTreeMap<String, f32>,
}

impl MovementRequest {
    /// Create a request with normal priority and no id or constraints.
    pub fn new(
        entity: EntityId,
        kind: MovementKind,
        direction: Vec2,
        magnitude: f32,
        created_at: Seconds,
    ) -> Self {
        Self {
            entity,
            kind,
            direction,
            magnitude,
            priority: Priority::Normal,
            created_at,
            request_id: None,
            constraints: BTreeMap::new(),
        }
    }

    /// Walk along `direction` at `speed`.
    pub fn walk(entity: EntityId, direction: Vec2, speed: f32, now: Seconds) -> Self {
        Self::new(entity, MovementKind::Walk, direction, speed, now)
    }

    /// Jump with upward speed `force`.
    pub fn jump(entity: EntityId, force: f32, now: Seconds) -> Self {
        Self::new(entity, MovementKind::Jump, UP, force, now)
    }

    /// Dash along `direction` at `speed`.
    pub fn dash(entity: EntityId, direction: Vec2, speed: f32, now: Seconds) -> Self {
        Self::new(entity, MovementKind::Dash, direction, speed, now)
    }

    /// Stop driven motion.
    pub fn stop(entity: EntityId, now: Seconds) -> Self {
        Self::new(entity, MovementKind::Stop, Vec2::ZERO, 0.0, now)
    }

    /// Instantaneous velocity change `vector`.
    pub fn impulse(entity: EntityId, vector: Vec2, now: Seconds) -> Self {
        let magnitude = vector.length();
        let direction = if magnitude > 0.0 && magnitude.is_finite() {
            vector / magnitude
        } else {
            vector
        };
        Self::new(entity, MovementKind::Impulse, direction, magnitude, now)
    }

    /// Copy with a different priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Copy carrying a request id.
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Copy with an extra constraint.
    pub fn with_constraint(mut self, key: impl Into<String>, value: f32) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    /// New request for a retry: magnitude scaled, fresh timestamp, same id.
    pub fn retry_with(&self, magnitude_multiplier: f32, now: Seconds) -> Self {
        Self {
            magnitude: self.magnitude * magnitude_multiplier,
            created_at: now,
            ..self.clone()
        }
    }

    /// Target entity.
    #[inline]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Movement kind.
    #[inline]
    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    /// Requested direction.
    #[inline]
    pub fn direction(&self) -> Vec2 {
        self.direction
    }

    /// Requested magnitude (speed or force).
    #[inline]
    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }

    /// Direction scaled by magnitude.
    #[inline]
    pub fn vector(&self) -> Vec2 {
        self.direction * self.magnitude
    }

    /// Priority.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Simulation time the request was created at.
    #[inline]
    pub fn created_at(&self) -> Seconds {
        self.created_at
    }

    /// Optional correlation id.
    #[inline]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// Constraint map.
    #[inline]
    pub fn constraints(&self) -> &BTreeMap<String, f32> {
        &self.constraints
    }

    /// Look up one constraint.
    pub fn constraint(&self, key: &str) -> Option<f32> {
        self.constraints.get(key).copied()
    }

    /// Age of the request at `now`.
    #[inline]
    pub fn age(&self, now: Seconds) -> Seconds {
        now - self.created_at
    }

    /// True once the request is older than `max_age`.
    #[inline]
    pub fn is_expired(&self, now: Seconds, max_age: Seconds) -> bool {
        self.age(now) > max_age + TIME_EPSILON
    }

    /// Check the request's invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity.is_sentinel() {
            return Err(ValidationError::SentinelEntity(self.entity));
        }
        if !self.created_at.is_finite() {
            return Err(ValidationError::NonFiniteTimestamp);
        }
        if !self.direction.is_finite() {
            return Err(ValidationError::NonFiniteDirection);
        }
        if !self.magnitude.is_finite() {
            return Err(ValidationError::NonFiniteMagnitude);
        }
        if self.magnitude < 0.0 {
            return Err(ValidationError::NegativeMagnitude(self.magnitude));
        }

        let kind = self.kind;
        match kind {
            MovementKind::Walk | MovementKind::Dash => {
                let length = self.direction.length();
                if length == 0.0 {
                    return Err(ValidationError::ZeroDirection { kind });
                }
                if (length - 1.0).abs() > DIRECTION_TOLERANCE {
                    return Err(ValidationError::NonUnitDirection { kind, length });
                }
            }
            MovementKind::Jump => {
                if self.magnitude <= 0.0 {
                    return Err(ValidationError::NonPositiveMagnitude { kind });
                }
            }
            MovementKind::Impulse => {
                if self.direction == Vec2::ZERO {
                    return Err(ValidationError::ZeroDirection { kind });
                }
                if self.magnitude <= 0.0 {
                    return Err(ValidationError::NonPositiveMagnitude { kind });
                }
            }
            MovementKind::Stop => {}
        }
        Ok(())
    }

    /// True when `validate` passes.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E: EntityId = EntityId(1);

    #[test]
    fn test_walk_validation() {
        assert!(MovementRequest::walk(E, Vec2::X, 200.0, 0.0).is_valid());
        assert!(MovementRequest::walk(E, Vec2::new(0.0, 0.0), 200.0, 0.0).validate()
            == Err(ValidationError::ZeroDirection { kind: MovementKind::Walk }));
        assert!(matches!(
            MovementRequest::walk(E, Vec2::new(2.0, 0.0), 200.0, 0.0).validate(),
            Err(ValidationError::NonUnitDirection { .. })
        ));
        // Zero speed walk is allowed (degenerate but harmless)
        assert!(MovementRequest::walk(E, Vec2::NEG_X, 0.0, 0.0).is_valid());
    }

    #[test]
    fn test_jump_and_impulse_need_positive_magnitude() {
        assert!(MovementRequest::jump(E, 540.0, 0.0).is_valid());
        assert!(!MovementRequest::jump(E, 0.0, 0.0).is_valid());
        assert!(!MovementRequest::jump(E, -1.0, 0.0).is_valid());
        assert!(MovementRequest::impulse(E, Vec2::new(0.0, -300.0), 0.0).is_valid());
        assert!(!MovementRequest::impulse(E, Vec2::ZERO, 0.0).is_valid());
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(
            MovementRequest::walk(E, Vec2::new(f32::NAN, 0.0), 1.0, 0.0).validate(),
            Err(ValidationError::NonFiniteDirection)
        );
        assert_eq!(
            MovementRequest::dash(E, Vec2::X, f32::INFINITY, 0.0).validate(),
            Err(ValidationError::NonFiniteMagnitude)
        );
        assert_eq!(
            MovementRequest::stop(E, f64::NAN).validate(),
            Err(ValidationError::NonFiniteTimestamp)
        );
    }

    #[test]
    fn test_sentinel_entity_rejected() {
        assert!(!MovementRequest::stop(EntityId::GROUND, 0.0).is_valid());
    }

    #[test]
    fn test_expiry() {
        let req = MovementRequest::walk(E, Vec2::X, 100.0, 1.0);
        assert!(!req.is_expired(1.05, 0.1));
        assert!(!req.is_expired(1.1, 0.1));
        assert!(req.is_expired(1.2, 0.1));
    }

    #[test]
    fn test_retry_is_a_new_request() {
        let req = MovementRequest::walk(E, Vec2::X, 200.0, 1.0)
            .with_priority(Priority::High)
            .with_request_id(RequestId(9));
        let retry = req.retry_with(0.75, 2.0);
        assert_eq!(retry.magnitude(), 150.0);
        assert_eq!(retry.created_at(), 2.0);
        assert_eq!(retry.priority(), Priority::High);
        assert_eq!(retry.request_id(), Some(RequestId(9)));
        // Original untouched
        assert_eq!(req.magnitude(), 200.0);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_constraints() {
        let req = MovementRequest::walk(E, Vec2::X, 500.0, 0.0).with_constraint(CONSTRAINT_MAX_SPEED, 100.0);
        assert_eq!(req.constraint(CONSTRAINT_MAX_SPEED), Some(100.0));
        assert_eq!(req.constraint(CONSTRAINT_HORIZONTAL_ONLY), None);
    }
}
