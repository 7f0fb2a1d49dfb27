pub mod cloud;
pub mod config;
pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod storage;
pub mod types;

pub use config::Config;
pub use context::DeployContext;
pub use engine::{Deployment, RotationOptions};
pub use error::{DeployError, Result};
pub use types::*;
