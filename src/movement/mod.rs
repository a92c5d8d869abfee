//! Movement Layer
//!
//! Everything that asks for motion without performing it: the request
//! intake, the character ability facade and raw input translation.

pub mod character;
pub mod coordinator;
pub mod input;

pub use character::{CharacterPhysics, CharacterPhysicsCoordinator, CharacterState, MovementCapabilities};
pub use coordinator::{channels, MovementCoordinator, MovementHandler};
pub use input::{axis_value, InputDelta, InputFrame, InputHandler, InputRecorder, InputTrack, ReplayIterator};
