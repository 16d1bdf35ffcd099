//! In-memory storage backends.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{CredentialStorage, SessionStorage};
use crate::AuthResult;
use crate::audit::AuditEntry;
use crate::credentials::StoredCredential;
use crate::session::{Session, SessionValidation};

/// Session storage backed by a [`DashMap`].
///
/// Per-key operations hold the shard lock, so `touch` checks expiry and
/// refreshes the timestamp in one step.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn insert(&self, token_hash: &str, session: Session) -> AuthResult<()> {
        self.sessions.insert(token_hash.to_string(), session);
        Ok(())
    }

    async fn touch(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        ttl: time::Duration,
    ) -> AuthResult<SessionValidation> {
        match self.sessions.entry(token_hash.to_string()) {
            Entry::Vacant(_) => Ok(SessionValidation::Invalid),
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now, ttl) {
                    occupied.remove();
                    return Ok(SessionValidation::Expired);
                }
                let session = occupied.get_mut();
                session.last_activity = now;
                Ok(SessionValidation::Valid(session.clone()))
            }
        }
    }

    async fn peek(&self, token_hash: &str) -> AuthResult<Option<Session>> {
        Ok(self.sessions.get(token_hash).map(|s| s.clone()))
    }

    async fn remove(&self, token_hash: &str) -> AuthResult<bool> {
        Ok(self.sessions.remove(token_hash).is_some())
    }

    async fn remove_for_identity(&self, identity: &str) -> AuthResult<usize> {
        let mut removed = 0;
        self.sessions.retain(|_, s| {
            let keep = s.identity != identity;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn remove_expired(&self, now: OffsetDateTime, ttl: time::Duration) -> AuthResult<usize> {
        let mut removed = 0;
        self.sessions.retain(|_, s| {
            let keep = !s.is_expired(now, ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn count(&self) -> AuthResult<usize> {
        Ok(self.sessions.len())
    }
}

/// Credential storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStorage {
    records: RwLock<BTreeMap<String, StoredCredential>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = (String, StoredCredential)>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
            audit: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CredentialStorage for MemoryCredentialStorage {
    async fn get(&self, identity: &str) -> AuthResult<Option<StoredCredential>> {
        Ok(self.records.read().await.get(identity).cloned())
    }

    async fn list(&self) -> AuthResult<BTreeMap<String, StoredCredential>> {
        Ok(self.records.read().await.clone())
    }

    async fn insert_if_absent(&self, identity: &str, value: StoredCredential) -> AuthResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(identity) {
            return Ok(false);
        }
        records.insert(identity.to_string(), value);
        Ok(true)
    }

    async fn replace_if_unchanged(
        &self,
        identity: &str,
        expected: &StoredCredential,
        value: StoredCredential,
    ) -> AuthResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(identity) {
            Some(current) if current == expected => {
                *current = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, identity: &str) -> AuthResult<bool> {
        Ok(self.records.write().await.remove(identity).is_some())
    }

    async fn append_audit(&self, entry: AuditEntry) -> AuthResult<()> {
        self.audit.write().await.push(entry);
        Ok(())
    }

    async fn audit_log(&self) -> AuthResult<Vec<AuditEntry>> {
        Ok(self.audit.read().await.clone())
    }
}
