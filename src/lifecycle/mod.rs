pub mod controller;
pub mod health;

pub use controller::NodeController;
pub use health::{is_actually_running, is_healthy, is_operational, status_label, Assessment};
