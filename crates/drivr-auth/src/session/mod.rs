//! Session issuance and validation.
//!
//! A session is an opaque token bound to one identity. It expires after a
//! fixed period of inactivity, and every successful validation refreshes its
//! activity timestamp. Tokens are stored only as SHA-256 hashes.

mod manager;

pub use manager::SessionManager;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token. Only populated on the value returned to the
    /// caller at creation; stored copies carry an empty string.
    #[serde(skip)]
    pub token: String,

    pub identity: String,

    pub is_admin: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
}

impl Session {
    /// Returns `true` once `ttl` has elapsed since the last activity.
    pub fn is_expired(&self, now: OffsetDateTime, ttl: time::Duration) -> bool {
        now - self.last_activity >= ttl
    }
}

/// Outcome of validating a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValidation {
    /// The session is live. Its activity timestamp has been refreshed.
    Valid(Session),
    /// The session existed but exceeded the inactivity limit. It has been
    /// removed.
    Expired,
    /// No session matches the token.
    Invalid,
}

impl SessionValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The live session, or the matching session error.
    ///
    /// # Errors
    ///
    /// `AuthError::SessionExpired` or `AuthError::InvalidSession`.
    pub fn into_session(self) -> AuthResult<Session> {
        match self {
            Self::Valid(session) => Ok(session),
            Self::Expired => Err(AuthError::SessionExpired),
            Self::Invalid => Err(AuthError::InvalidSession),
        }
    }
}

/// Generate a 256-bit random token encoded as base64url (43 characters).
#[must_use]
pub fn generate_token() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token for storage and lookup.
#[must_use]
pub fn hash_token(token: &str) -> String {
    crate::credentials::hash::sha256_hex(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_generate_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), "abc");
        assert_eq!(hash_token("abc").len(), 64);
    }

    #[test]
    fn test_into_session_maps_failures_to_session_errors() {
        assert!(matches!(
            SessionValidation::Expired.into_session(),
            Err(AuthError::SessionExpired)
        ));
        let err = SessionValidation::Invalid.into_session().unwrap_err();
        assert!(err.is_session_error());
        assert!(matches!(err, AuthError::InvalidSession));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let start = datetime!(2025-01-01 00:00 UTC);
        let session = Session {
            token: String::new(),
            identity: "driver7".to_string(),
            is_admin: false,
            issued_at: start,
            last_activity: start,
        };
        let ttl = time::Duration::hours(2);
        assert!(!session.is_expired(start + time::Duration::minutes(119), ttl));
        assert!(session.is_expired(start + ttl, ttl));
    }
}
