//! Movement Protocol
//!
//! Value types exchanged between the input, movement, collision and physics
//! layers. None of them carry behavior beyond validation.

pub mod contact;
pub mod ids;
pub mod request;
pub mod respawn;
pub mod response;
pub mod state;

pub use contact::{
    CollisionInfo, CollisionType, ContactKey, GroundInfo, SurfaceDescriptor, SurfaceKind,
};
pub use ids::{ColliderId, EntityId, RequestId};
pub use request::{
    MovementKind, MovementRequest, Priority, ValidationError, CONSTRAINT_HORIZONTAL_ONLY,
    CONSTRAINT_MAX_SPEED, DIRECTION_TOLERANCE,
};
pub use respawn::{RespawnState, RespawnTag, MAX_INVULNERABILITY};
pub use response::{MovementResponse, ResponseStatus};
pub use state::{AccumulationViolation, PhysicsState};
