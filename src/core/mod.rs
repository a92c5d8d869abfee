//! Core primitives.
//!
//! Geometry, simulation time and state hashing. Nothing in here knows about
//! entities or requests.

pub mod aabb;
pub mod hash;
pub mod time;

// Re-export core types
pub use aabb::{Aabb, Axis, Separation, DOWN, UP};
pub use hash::{compute_world_hash, StateHash, StateHasher};
pub use time::{FixedTimestep, Seconds, SimClock, TIME_EPSILON};
