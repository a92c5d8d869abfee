//! Async Runtime
//!
//! Runs a `Simulation` on its own tokio task. Callers talk to it through a
//! cloneable handle: commands go in over `mpsc`, each submitted request gets
//! its response back on a `oneshot`, and collision events fan out on a
//! `broadcast` channel.

pub mod driver;

pub use driver::{DriverConfig, DriverError, DriverHandle, PhysicsDriver};
