//! Tracing setup for the engine runner.
//!
//! The subscriber is installed once at startup with a default level, before
//! configuration is read. The filter sits behind a reload handle so the
//! runner can apply `logging.level` from the loaded [`AppConfig`] without
//! reinstalling the subscriber. `RUST_LOG`, when set, takes precedence at
//! startup.
//!
//! [`AppConfig`]: crate::config::AppConfig

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    // RUST_LOG wins over the configured level when set.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Apply a new logging level at runtime. Returns `false` if tracing was not
/// initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return false;
    };
    let applied = handle
        .modify(|f| {
            *f = EnvFilter::new(level);
        })
        .is_ok();
    if applied {
        tracing::debug!(level, "Log level applied");
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_applies_after_init() {
        init_tracing_with_level("warn");
        assert!(apply_logging_level("debug"));
        assert!(apply_logging_level("info"));
    }
}
