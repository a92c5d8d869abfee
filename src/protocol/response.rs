//! Movement Responses
//!
//! What the physics authority actually did with a request. Velocity and
//! position are always read back from authoritative state, never copied from
//! the request.

use std::fmt;
use std::time::Duration;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::protocol::ids::EntityId;
use crate::protocol::request::MovementRequest;

/// Outcome of a movement request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Applied as requested
    Success,
    /// Applied, but clipped by collision or a cap
    PartialSuccess,
    /// Fully prevented (collision, not grounded)
    Blocked,
    /// Could not be applied (system error, corrupted state)
    Failed,
    /// Aged past the expiry window before processing
    Expired,
    /// Malformed, unknown entity, or superseded
    Rejected,
}

impl ResponseStatus {
    /// True when the request had at least some effect.
    #[inline]
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }

    /// True for statuses that must carry a reason.
    #[inline]
    pub fn requires_reason(self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Authoritative answer to a `MovementRequest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementResponse {
    /// The originating request
    pub request: MovementRequest,
    /// Outcome
    pub status: ResponseStatus,
    /// Velocity after processing (authoritative)
    pub actual_velocity: Vec2,
    /// Position after processing (authoritative)
    pub actual_position: Vec2,
    /// Grounded after processing
    pub grounded: bool,
    /// Entities/sentinels the body is in contact with
    pub active_collisions: Vec<EntityId>,
    /// Wall-clock time spent processing (diagnostic only)
    pub processing_duration: Duration,
    /// Human-readable constraint or failure reason
    pub reason: Option<String>,
}

impl MovementResponse {
    /// Response for a request whose entity has no body, so there is no
    /// authoritative state to report.
    pub fn unprocessed(
        request: MovementRequest,
        status: ResponseStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            request,
            status,
            actual_velocity: Vec2::ZERO,
            actual_position: Vec2::ZERO,
            grounded: false,
            active_collisions: Vec::new(),
            processing_duration: Duration::ZERO,
            reason: Some(reason.into()),
        }
    }

    /// Target entity.
    #[inline]
    pub fn entity(&self) -> EntityId {
        self.request.entity()
    }

    /// True when the request had at least some effect.
    #[inline]
    pub fn is_applied(&self) -> bool {
        self.status.is_applied()
    }
}
