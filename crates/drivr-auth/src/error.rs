//! Authentication and credential error types.
//!
//! This module defines all error types that can occur during session and
//! credential operations.

use std::fmt;

/// Errors that can occur during session and credential operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identity is unknown, disabled, or the secret does not match.
    #[error("Authentication failed: {message}")]
    AuthFailure {
        /// Description of why authentication failed.
        message: String,
    },

    /// The session exceeded its inactivity limit.
    #[error("Session expired")]
    SessionExpired,

    /// The presented token does not belong to any session.
    #[error("Invalid session token")]
    InvalidSession,

    /// A proposed secret or value does not satisfy policy.
    #[error("Policy violation: {message}")]
    PolicyViolation {
        /// Description of the violated rule.
        message: String,
    },

    /// The operation targets a safeguarded built-in account.
    #[error("Account '{identity}' is protected")]
    Protected {
        /// The protected identity.
        identity: String,
    },

    /// The caller lacks the privilege for the operation.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// No credential record exists for the identity.
    #[error("Account '{identity}' not found")]
    NotFound {
        /// The missing identity.
        identity: String,
    },

    /// A stored record could not be decoded.
    #[error("Malformed credential record for '{identity}': {message}")]
    MalformedRecord {
        /// Identity whose record is malformed.
        identity: String,
        /// Description of the decoding problem.
        message: String,
    },

    /// An error occurred while storing or retrieving auth data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `AuthFailure` error.
    #[must_use]
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Creates a new `PolicyViolation` error.
    #[must_use]
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation {
            message: message.into(),
        }
    }

    /// Creates a new `Protected` error.
    #[must_use]
    pub fn protected(identity: impl Into<String>) -> Self {
        Self::Protected {
            identity: identity.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(identity: impl Into<String>) -> Self {
        Self::NotFound {
            identity: identity.into(),
        }
    }

    /// Creates a new `MalformedRecord` error.
    #[must_use]
    pub fn malformed(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            identity: identity.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller caused the error.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::AuthFailure { .. }
                | Self::SessionExpired
                | Self::InvalidSession
                | Self::PolicyViolation { .. }
                | Self::Protected { .. }
                | Self::Forbidden { .. }
                | Self::NotFound { .. }
        )
    }

    /// Returns `true` if the error originates in infrastructure or a bug.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if this is a session-related error.
    #[must_use]
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::InvalidSession)
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthFailure { .. } => ErrorCategory::Authentication,
            Self::SessionExpired | Self::InvalidSession => ErrorCategory::Session,
            Self::PolicyViolation { .. } => ErrorCategory::Validation,
            Self::Protected { .. } | Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::Validation,
            Self::MalformedRecord { .. } | Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of auth errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification failures.
    Authentication,
    /// Permission and safeguard failures.
    Authorization,
    /// Session lifecycle failures.
    Session,
    /// Request validation errors.
    Validation,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Session => write!(f, "session"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
