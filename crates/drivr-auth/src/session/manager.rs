//! Session manager.

use std::sync::Arc;

use drivr_core::{SharedClock, to_time_duration};

use super::{Session, SessionValidation, generate_token, hash_token};
use crate::AuthResult;
use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::storage::SessionStorage;

/// Issues, validates and expires sessions.
///
/// All session state lives in the shared [`SessionStorage`], so destroying a
/// token logs out every client holding it.
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    credentials: Arc<CredentialStore>,
    clock: SharedClock,
    ttl: time::Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        credentials: Arc<CredentialStore>,
        clock: SharedClock,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            storage,
            credentials,
            clock,
            ttl: to_time_duration(ttl),
        }
    }

    pub fn ttl(&self) -> time::Duration {
        self.ttl
    }

    /// Issue a session for `identity`.
    ///
    /// Does not check a secret; callers authenticate first.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AuthFailure` if the identity is unknown or disabled.
    pub async fn create_session(&self, identity: &str) -> AuthResult<Session> {
        let record = self
            .credentials
            .record(identity)
            .await?
            .filter(|r| r.status.is_active())
            .ok_or_else(|| AuthError::auth_failure("unknown or disabled identity"))?;

        let token = generate_token();
        let now = self.clock.now();
        let session = Session {
            token: String::new(),
            identity: record.identity,
            is_admin: record.is_admin,
            issued_at: now,
            last_activity: now,
        };
        self.storage.insert(&hash_token(&token), session.clone()).await?;

        tracing::info!(identity = %session.identity, "Session created");
        Ok(Session { token, ..session })
    }

    /// Validate `token`, refreshing its activity on success.
    ///
    /// An expired session is destroyed as a side effect.
    pub async fn validate(&self, token: &str) -> AuthResult<SessionValidation> {
        let outcome = self
            .storage
            .touch(&hash_token(token), self.clock.now(), self.ttl)
            .await?;
        match outcome {
            SessionValidation::Valid(session) => Ok(SessionValidation::Valid(Session {
                token: token.to_string(),
                ..session
            })),
            SessionValidation::Expired => {
                tracing::debug!("Session expired on validation");
                Ok(SessionValidation::Expired)
            }
            SessionValidation::Invalid => Ok(SessionValidation::Invalid),
        }
    }

    /// Identity of the session behind `token`, without refreshing it.
    pub async fn peek_identity(&self, token: &str) -> AuthResult<Option<String>> {
        Ok(self
            .storage
            .peek(&hash_token(token))
            .await?
            .map(|s| s.identity))
    }

    /// Destroy the session behind `token`. Unknown tokens are ignored.
    pub async fn destroy(&self, token: &str) -> AuthResult<()> {
        if self.storage.remove(&hash_token(token)).await? {
            tracing::info!("Session destroyed");
        }
        Ok(())
    }

    /// Destroy every session held by `identity`.
    pub async fn destroy_all_for(&self, identity: &str) -> AuthResult<usize> {
        let removed = self.storage.remove_for_identity(identity).await?;
        if removed > 0 {
            tracing::info!(identity = %identity, removed, "Sessions revoked");
        }
        Ok(removed)
    }

    /// Remove all expired sessions.
    pub async fn sweep(&self) -> AuthResult<usize> {
        let removed = self
            .storage
            .remove_expired(self.clock.now(), self.ttl)
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    pub async fn active_count(&self) -> AuthResult<usize> {
        self.storage.count().await
    }
}
