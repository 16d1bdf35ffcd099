//! Session and credential configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth.session]
//! ttl = "2h"
//! sweep_interval = "5m"
//!
//! [auth.credentials]
//! min_secret_length = 8
//! protected_identities = ["admin", "trooper1", "trooper2", "commander"]
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root auth configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session lifetime settings.
    pub session: SessionConfig,

    /// Credential policy settings.
    pub credentials: CredentialConfig,
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity limit. A session expires once this much time passes
    /// without an authenticated request.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How often the background sweeper removes expired sessions.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(2 * 3600),          // 2 hours
            sweep_interval: Duration::from_secs(5 * 60), // 5 minutes
        }
    }
}

/// Credential policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Minimum length of a newly chosen secret.
    pub min_secret_length: usize,

    /// Secret assigned to identities added from the external roster.
    pub default_secret: String,

    /// Built-in administrative identities that can never be deleted.
    pub protected_identities: Vec<String>,

    /// Identities treated as administrators when their record is in the
    /// legacy flat format (which carries no role flags).
    pub legacy_admin_identities: Vec<String>,

    /// The primary administrator. Always has admin privileges.
    pub primary_admin: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            min_secret_length: 8,
            default_secret: "secret123".to_string(),
            protected_identities: vec![
                "admin".to_string(),
                "trooper1".to_string(),
                "trooper2".to_string(),
                "commander".to_string(),
            ],
            legacy_admin_identities: vec![
                "trooper1".to_string(),
                "trooper2".to_string(),
                "commander".to_string(),
            ],
            primary_admin: "admin".to_string(),
        }
    }
}

impl CredentialConfig {
    /// Returns `true` if `identity` is a protected built-in account.
    pub fn is_protected(&self, identity: &str) -> bool {
        identity == self.primary_admin || self.protected_identities.iter().any(|p| p == identity)
    }

    /// Returns `true` if a legacy record for `identity` carries admin rights.
    pub fn is_legacy_admin(&self, identity: &str) -> bool {
        identity == self.primary_admin
            || self.legacy_admin_identities.iter().any(|p| p == identity)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The session TTL or sweep interval is zero
    /// - The minimum secret length is zero
    /// - The roster default secret is empty
    /// - No primary admin is configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session ttl must be > 0".to_string(),
            ));
        }

        if self.session.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session sweep_interval must be > 0".to_string(),
            ));
        }

        if self.credentials.min_secret_length == 0 {
            return Err(ConfigError::InvalidValue(
                "min_secret_length must be > 0".to_string(),
            ));
        }

        if self.credentials.default_secret.is_empty() {
            return Err(ConfigError::Missing("credentials.default_secret".to_string()));
        }

        if self.credentials.primary_admin.trim().is_empty() {
            return Err(ConfigError::Missing("credentials.primary_admin".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.ttl, Duration::from_secs(7200));
    }

    #[test]
    fn test_zero_ttl_fails_validation() {
        let mut config = AuthConfig::default();
        config.session.ttl = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ttl"));
    }

    #[test]
    fn test_empty_default_secret_fails_validation() {
        let mut config = AuthConfig::default();
        config.credentials.default_secret = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_protected_and_legacy_admin_lookup() {
        let creds = CredentialConfig::default();
        assert!(creds.is_protected("admin"));
        assert!(creds.is_protected("commander"));
        assert!(!creds.is_protected("driver7"));

        assert!(creds.is_legacy_admin("admin"));
        assert!(creds.is_legacy_admin("trooper2"));
        assert!(!creds.is_legacy_admin("driver7"));
    }

    #[test]
    fn test_humantime_durations_parse() {
        let json = r#"{"session": {"ttl": "30m", "sweep_interval": "10s"}}"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.ttl, Duration::from_secs(1800));
        assert_eq!(config.session.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.credentials.min_secret_length, 8);
    }
}
