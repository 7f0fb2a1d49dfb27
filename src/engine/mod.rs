pub mod coordinator;
pub mod repair;
pub mod rotation;

pub use coordinator::{Deployment, FleetEntry};
pub use rotation::{Rotation, RotationOptions, RotationState, RotationStateMachine};
