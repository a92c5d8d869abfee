//! # Aether Physics
//!
//! Deterministic physics and movement coordination for a 2D action
//! platformer. One authority owns position and velocity; everything else
//! asks for motion through requests and learns the outcome from responses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AETHER PHYSICS                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Geometry, sim time, state hashing         │
//! │  protocol/       - Requests, responses, contacts, respawns   │
//! │                                                              │
//! │  physics/        - The authority                             │
//! │  ├── world.rs    - Level colliders, moving platforms         │
//! │  ├── notifier.rs - Contacts, grounded state, coyote time     │
//! │  ├── events.rs   - Ordered collision events, listeners       │
//! │  └── coordinator.rs - Integration, constraints, resets       │
//! │                                                              │
//! │  movement/       - Everything that asks for motion           │
//! │  ├── coordinator.rs - Intake, conflicts, retries             │
//! │  ├── character.rs   - Jumps, dashes, respawn                 │
//! │  └── input.rs       - Frames to requests, recording          │
//! │                                                              │
//! │  simulation.rs   - Fixed-step loop, hashing, replay          │
//! │  runtime/        - Tokio driver task (non-deterministic)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per tick: input handler → movement coordinator → physics coordinator
//! (integrate, collide, resolve) → collision notifier → responses and
//! events back to callers.
//!
//! ## Determinism
//!
//! Everything under `simulation` is replayable:
//! - `BTreeMap` everywhere iteration order matters
//! - Time is derived from the tick counter, never the wall clock
//! - Events are delivered in (tick, priority, entity) order
//!
//! Same level, config and inputs give the same world hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod movement;
pub mod physics;
pub mod protocol;
pub mod runtime;
pub mod simulation;

// Re-export commonly used types
pub use config::{ConfigError, SimulationConfig};
pub use movement::{
    CharacterPhysics, CharacterPhysicsCoordinator, InputFrame, MovementCoordinator, MovementHandler,
};
pub use physics::{
    BodyDef, CollisionListener, CollisionNotification, PhysicsCoordination, PhysicsCoordinator,
    PhysicsError, PhysicsEvent, StaticWorld,
};
pub use protocol::{
    EntityId, MovementKind, MovementRequest, MovementResponse, PhysicsState, Priority, RequestId,
    RespawnState, ResponseStatus,
};
pub use simulation::{Simulation, TickResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
