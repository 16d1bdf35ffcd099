//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use drivr_auth::credentials::hash::sha256_hex;
use drivr_auth::{MemoryCredentialStorage, StoredCredential};
use drivr_core::ManualClock;
use drivr_engine::config::AppConfig;
use drivr_engine::source::{MemoryDataSource, Row};
use drivr_engine::Engine;
use serde_json::Value;
use time::macros::datetime;

pub const DRIVER_SECRET: &str = "driverpw";
pub const ADMIN_SECRET: &str = "adminpw1";

pub struct Fixture {
    pub engine: Arc<Engine>,
    pub source: Arc<MemoryDataSource>,
    pub credentials: Arc<MemoryCredentialStorage>,
    pub clock: Arc<ManualClock>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.retry_backoff = Duration::from_millis(5);
    config
}

pub fn fixture(config: AppConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 08:00 UTC)));
    let source = Arc::new(MemoryDataSource::new());
    let credentials = Arc::new(MemoryCredentialStorage::with_records([
        ("admin".to_string(), StoredCredential::Legacy(sha256_hex(ADMIN_SECRET))),
        ("driver7".to_string(), StoredCredential::Legacy(sha256_hex(DRIVER_SECRET))),
        ("driver8".to_string(), StoredCredential::Legacy(sha256_hex(DRIVER_SECRET))),
    ]));
    let engine = Engine::builder(config)
        .source(source.clone())
        .credential_storage(credentials.clone())
        .clock(clock.clone())
        .build()
        .expect("engine builds");
    Fixture {
        engine: Arc::new(engine),
        source,
        credentials,
        clock,
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
