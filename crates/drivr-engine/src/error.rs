//! Engine error taxonomy.
//!
//! Every fallible engine operation returns [`EngineError`]. Auth errors are
//! folded in through `From<AuthError>`, source errors through
//! `From<SourceError>`. The core never formats presentation text; callers
//! map variants to user messages.

use std::fmt;
use std::time::Duration;

use drivr_auth::AuthError;

use crate::source::SourceError;

/// Errors surfaced by the engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Bad identity, bad secret, or unknown session token.
    #[error("Authentication failed: {message}")]
    AuthFailure {
        /// Description of the failure.
        message: String,
    },

    /// The session exceeded its inactivity limit.
    #[error("Session expired")]
    Expired,

    /// Admission was denied. Retry after the suggested backoff.
    #[error("Throttled, retry after {retry_after:?}")]
    Throttled {
        /// Suggested backoff before retrying.
        retry_after: Duration,
    },

    /// A proposed value violates policy, e.g. a weak secret.
    #[error("Policy violation: {message}")]
    PolicyViolation {
        /// Description of the violated rule.
        message: String,
    },

    /// Disallowed mutation of a safeguarded account.
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

    /// The target account does not exist.
    #[error("Account '{identity}' not found")]
    NotFound {
        /// The missing identity.
        identity: String,
    },

    /// The external data source timed out or failed.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// Description of the upstream failure.
        message: String,
    },

    /// The engine is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// Local storage failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl EngineError {
    /// Creates a new `AuthFailure` error.
    #[must_use]
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Creates a new `Throttled` error.
    #[must_use]
    pub fn throttled(retry_after: Duration) -> Self {
        Self::Throttled { retry_after }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
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

    /// Returns `true` if repeating the request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::UpstreamUnavailable { .. }
        )
    }

    /// Suggested backoff, for throttled requests.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthFailure { .. } | Self::Expired => ErrorCategory::Authentication,
            Self::Protected { .. } | Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::PolicyViolation { .. } | Self::NotFound { .. } => ErrorCategory::Validation,
            Self::Throttled { .. } => ErrorCategory::Throttling,
            Self::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            Self::Configuration { .. } | Self::Storage { .. } | Self::Internal { .. } => {
                ErrorCategory::Internal
            }
        }
    }
}

/// Categories of engine errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Validation,
    Throttling,
    Upstream,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Validation => write!(f, "validation"),
            Self::Throttling => write!(f, "throttling"),
            Self::Upstream => write!(f, "upstream"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl From<AuthError> for EngineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthFailure { message } => Self::AuthFailure { message },
            AuthError::SessionExpired => Self::Expired,
            AuthError::InvalidSession => Self::auth_failure("invalid session token"),
            AuthError::PolicyViolation { message } => Self::PolicyViolation { message },
            AuthError::Protected { identity } => Self::Protected { identity },
            AuthError::Forbidden { message } => Self::Forbidden { message },
            AuthError::NotFound { identity } => Self::NotFound { identity },
            AuthError::MalformedRecord { identity, message } => Self::Storage {
                message: format!("malformed credential record for '{identity}': {message}"),
            },
            AuthError::Storage { message } => Self::Storage { message },
            AuthError::Configuration { message } => Self::Configuration { message },
            AuthError::Internal { message } => Self::Internal { message },
        }
    }
}

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        Self::upstream(err.to_string())
    }
}

/// Type alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
