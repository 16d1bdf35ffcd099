use std::time::Duration;
use std::{env, fs};

use drivr_engine::config::AppConfig;
use drivr_engine::config::loader::load_config_with_prefix;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("drivr.toml");

    let toml_content = r#"
[auth.session]
ttl = "30m"

[auth.credentials]
min_secret_length = 10
protected_identities = ["admin", "commander"]

[cache]
short_ttl = "1m"
medium_ttl = "10m"
max_entries = 64

[throttle]
high_sessions = 80
low_sessions = 60
cooldown = "5m"

[currency]
window = "30days"
requirement_km = 5.0

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses; unset keys keep their defaults
    let cfg = load_config_with_prefix(Some(&path), "DRIVRPARSE").expect("should parse config");
    assert_eq!(cfg.auth.session.ttl, Duration::from_secs(1800));
    assert_eq!(cfg.auth.credentials.min_secret_length, 10);
    assert!(cfg.auth.credentials.is_protected("commander"));
    assert_eq!(cfg.cache.short_ttl, Duration::from_secs(60));
    assert_eq!(cfg.cache.long_ttl, Duration::from_secs(7200));
    assert_eq!(cfg.cache.max_entries, 64);
    assert_eq!(cfg.throttle.high_sessions, 80);
    assert_eq!(cfg.throttle.burst_requests, 300);
    assert_eq!(cfg.currency.policy().window, time::Duration::days(30));
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env overrides win over the file
    unsafe {
        env::set_var("DRIVRPARSE__CACHE__MAX_ENTRIES", "500");
        env::set_var("DRIVRPARSE__AUTH__SESSION__TTL", "45m");
    }
    let cfg_env = load_config_with_prefix(Some(&path), "DRIVRPARSE")
        .expect("should parse config with env overrides");
    assert_eq!(cfg_env.cache.max_entries, 500);
    assert_eq!(cfg_env.auth.session.ttl, Duration::from_secs(2700));
    unsafe {
        env::remove_var("DRIVRPARSE__CACHE__MAX_ENTRIES");
        env::remove_var("DRIVRPARSE__AUTH__SESSION__TTL");
    }

    // 3) Inverted hysteresis marks are rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[throttle]
high_sessions = 10
low_sessions = 20
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config_with_prefix(Some(&invalid_path), "DRIVRPARSE")
        .expect_err("expected validation error");
    assert!(err.to_string().contains("low-water"));
}

#[test]
fn serialized_defaults_load_back() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("drivr.toml");

    let mut config = AppConfig::default();
    config.throttle.per_client_limit = 42;
    config.upstream.timeout = Duration::from_secs(3);
    fs::write(&path, toml::to_string(&config).expect("serialize")).expect("write toml");

    let loaded = load_config_with_prefix(Some(&path), "DRIVRROUNDTRIP").expect("load");
    assert_eq!(loaded.throttle.per_client_limit, 42);
    assert_eq!(loaded.upstream.timeout, Duration::from_secs(3));
    assert_eq!(loaded.cache.medium_ttl, config.cache.medium_ttl);
    assert_eq!(
        loaded.storage.credentials_path,
        config.storage.credentials_path
    );
}

#[test]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let cfg = load_config_with_prefix(Some(&dir.path().join("absent.toml")), "DRIVRABSENT")
        .expect("defaults");
    assert_eq!(cfg.cache.max_entries, 200);
    assert_eq!(cfg.auth.session.ttl, Duration::from_secs(7200));
}
