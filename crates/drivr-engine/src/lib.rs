//! # drivr-engine
//!
//! Session and data-consistency engine for the DRIVr mileage tracker.
//!
//! Requests pass through admission control, then session validation, then
//! the operation. Reads go through a TTL read-through cache over the slow
//! external source; writes invalidate the affected keys before they return.
//!
//! ## Modules
//!
//! - [`engine`] - The [`Engine`] facade and its builder
//! - [`cache`] - Read-through cache with single-flight loads
//! - [`load`] - Admission control and the throttle mode state machine
//! - [`source`] - The external data source port and a resilient wrapper
//! - [`config`] - Configuration loading and validation
//! - [`observability`] - Tracing setup
//! - [`maintenance`] - Background sweeping and purging

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod load;
pub mod maintenance;
pub mod observability;
pub mod source;

pub use cache::{CacheKey, CacheRead, CacheStats, Freshness, ReadThroughCache, StalePolicy, TtlClass};
pub use config::{AppConfig, ConfigError};
pub use engine::{Engine, EngineBuilder, EngineStats, MaintenanceReport};
pub use error::{EngineError, EngineResult, ErrorCategory};
pub use load::{AdmissionPermit, AdmissionRequest, LoadMonitor, ThrottleController, ThrottleMode};
pub use maintenance::start_maintenance_task;
pub use source::{DataSource, MemoryDataSource, ObjectStore, ResilientSource, SourceError};
