//! Cache keys and TTL classes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;

/// Lifetime class of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Data that changes often or must track writes closely.
    Short,
    Medium,
    /// Slow-moving reference data.
    Long,
}

impl TtlClass {
    pub fn ttl(self, config: &CacheConfig) -> Duration {
        match self {
            Self::Short => config.short_ttl,
            Self::Medium => config.medium_ttl,
            Self::Long => config.long_ttl,
        }
    }
}

/// A cache key bound to its TTL class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
    class: TtlClass,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, class: TtlClass) -> Self {
        Self {
            name: name.into(),
            class,
        }
    }

    /// Drives logged by one identity.
    pub fn events(identity: &str) -> Self {
        Self::new(format!("events:{identity}"), TtlClass::Medium)
    }

    /// The external roster.
    pub fn roster() -> Self {
        Self::new("roster", TtlClass::Long)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> TtlClass {
        self.class
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_carry_their_class() {
        let key = CacheKey::events("driver7");
        assert_eq!(key.name(), "events:driver7");
        assert_eq!(key.class(), TtlClass::Medium);
        assert_eq!(CacheKey::roster().class(), TtlClass::Long);
    }

    #[test]
    fn test_ttl_from_config() {
        let config = CacheConfig::default();
        assert_eq!(TtlClass::Short.ttl(&config), Duration::from_secs(300));
        assert_eq!(TtlClass::Long.ttl(&config), Duration::from_secs(7200));
    }
}
