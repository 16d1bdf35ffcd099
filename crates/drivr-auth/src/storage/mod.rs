//! Storage traits for sessions and credentials.
//!
//! # Implementations
//!
//! - [`MemorySessionStorage`] - concurrent in-process session map
//! - [`MemoryCredentialStorage`] - in-process credential map, for tests
//! - [`FileCredentialStorage`] - JSON credential file plus JSON-lines audit
//!
//! Implementations must make [`CredentialStorage::insert_if_absent`],
//! [`CredentialStorage::replace_if_unchanged`] and [`SessionStorage::touch`]
//! atomic. They are relied on to resolve races without holding a lock across
//! calls.

mod file;
mod memory;

pub use file::FileCredentialStorage;
pub use memory::{MemoryCredentialStorage, MemorySessionStorage};

use async_trait::async_trait;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::audit::AuditEntry;
use crate::credentials::StoredCredential;
use crate::session::{Session, SessionValidation};

/// Storage for live sessions.
///
/// Sessions are keyed by the SHA-256 hash of their token. The raw token is
/// never stored.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Stores a new session under `token_hash`.
    async fn insert(&self, token_hash: &str, session: Session) -> AuthResult<()>;

    /// Atomically checks a session and refreshes its activity timestamp.
    ///
    /// An expired session is removed and reported as
    /// [`SessionValidation::Expired`].
    async fn touch(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        ttl: time::Duration,
    ) -> AuthResult<SessionValidation>;

    /// Returns the session without refreshing it.
    async fn peek(&self, token_hash: &str) -> AuthResult<Option<Session>>;

    /// Removes a session. Returns `true` if one existed.
    async fn remove(&self, token_hash: &str) -> AuthResult<bool>;

    /// Removes every session held by `identity`. Returns the number removed.
    async fn remove_for_identity(&self, identity: &str) -> AuthResult<usize>;

    /// Removes every expired session. Returns the number removed.
    async fn remove_expired(&self, now: OffsetDateTime, ttl: time::Duration) -> AuthResult<usize>;

    /// Number of stored sessions.
    async fn count(&self) -> AuthResult<usize>;
}

/// Storage for credential records and their audit trail.
///
/// Values are kept in their on-disk layout. Decoding and policy live in
/// [`crate::credentials::CredentialStore`].
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    async fn get(&self, identity: &str) -> AuthResult<Option<StoredCredential>>;

    /// All records, ordered by identity.
    async fn list(&self) -> AuthResult<BTreeMap<String, StoredCredential>>;

    /// Inserts `value` only if `identity` has no record. Returns `true` if
    /// inserted. Must be atomic with respect to other writers.
    async fn insert_if_absent(&self, identity: &str, value: StoredCredential) -> AuthResult<bool>;

    /// Replaces the record for `identity` only if it still equals `expected`.
    ///
    /// Returns `false` without writing if the record was changed or removed
    /// since `expected` was read. Must be atomic with respect to other writers.
    async fn replace_if_unchanged(
        &self,
        identity: &str,
        expected: &StoredCredential,
        value: StoredCredential,
    ) -> AuthResult<bool>;

    /// Removes the record. Returns `true` if one existed.
    async fn remove(&self, identity: &str) -> AuthResult<bool>;

    async fn append_audit(&self, entry: AuditEntry) -> AuthResult<()>;

    /// Audit entries in append order.
    async fn audit_log(&self) -> AuthResult<Vec<AuditEntry>>;
}
