//! Physics Authority
//!
//! Bodies, level geometry, contact tracking and the coordinator that owns
//! them. Nothing outside this module writes position or velocity.

pub mod body;
pub mod coordinator;
pub mod events;
pub mod notifier;
pub mod queue;
pub mod world;

pub use body::{BodyDef, PhysicsError};
pub use coordinator::{PhysicsCoordination, PhysicsCoordinator};
pub use events::{CollisionListener, EventPriority, PhysicsEvent, PhysicsEventData};
pub use notifier::{CollisionNotification, CollisionNotifier, GroundPhase, ListenerId, CONTACT_EPSILON};
pub use queue::{QueuedRequest, RequestQueue};
pub use world::{ColliderKind, PlatformPath, StaticCollider, StaticWorld};
