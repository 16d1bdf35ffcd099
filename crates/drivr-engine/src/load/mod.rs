//! Load monitoring and adaptive throttling.

mod monitor;
mod throttle;

pub use monitor::{AdmissionPermit, AdmissionRequest, LoadMonitor, LoadSnapshot};
pub use throttle::{LoadSample, ThrottleController, ThrottleMode};
