//! # drivr-core
//!
//! Shared building blocks for the DRIVr engine crates.
//!
//! - [`clock`] - the time port every stateful component reads "now" from
//! - [`currency`] - the pure rolling-window currency evaluator

pub mod clock;
pub mod currency;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, to_time_duration};
pub use currency::{
    CurrencyAssessment, CurrencyPolicy, CurrencyRecord, CurrencyStatus, LoggedEvent, evaluate,
    summarize,
};
