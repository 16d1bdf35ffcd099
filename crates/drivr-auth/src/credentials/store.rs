//! Credential store adapter.
//!
//! [`CredentialStore`] sits between the engine and a [`CredentialStorage`]
//! backend. It decodes both record layouts, enforces the secret and
//! safeguard policy, and appends an audit entry for every mutation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use drivr_core::SharedClock;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

use super::hash;
use super::record::{AccountStatus, CredentialRecord, PasswordHash, RecordMetadata};
use crate::AuthResult;
use crate::audit::{AuditEntry, AuditField};
use crate::config::CredentialConfig;
use crate::error::AuthError;
use crate::storage::CredentialStorage;

/// Actor recorded for accounts created by roster synchronization.
pub const ROSTER_ACTOR: &str = "roster-sync";

/// Read-modify-write attempts before a contended update gives up.
const MAX_UPDATE_ATTEMPTS: usize = 8;

/// The identity performing a credential operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub identity: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn new(identity: impl Into<String>, is_admin: bool) -> Self {
        Self {
            identity: identity.into(),
            is_admin,
        }
    }
}

/// Outcome of a roster synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterSyncReport {
    /// Identities that were missing locally and have been created.
    pub added: Vec<String>,
    /// Identities that already had a record, left untouched.
    pub preserved: Vec<String>,
}

/// Policy-enforcing adapter over credential storage.
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
    policy: CredentialConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(
        storage: Arc<dyn CredentialStorage>,
        policy: CredentialConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            storage,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &CredentialConfig {
        &self.policy
    }

    /// Load and decode the record for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MalformedRecord` if the stored value cannot be
    /// decoded, or a storage error.
    pub async fn record(&self, identity: &str) -> AuthResult<Option<CredentialRecord>> {
        match self.storage.get(identity).await? {
            Some(stored) => CredentialRecord::decode(identity, &stored, &self.policy).map(Some),
            None => Ok(None),
        }
    }

    /// Check `secret` against the stored record for `identity`.
    ///
    /// Unknown and disabled identities never verify. A malformed record is
    /// logged and treated as a mismatch.
    pub async fn verify(&self, identity: &str, secret: &str) -> AuthResult<bool> {
        let record = match self.record(identity).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(false),
            Err(AuthError::MalformedRecord { message, .. }) => {
                tracing::warn!(identity = %identity, error = %message, "Skipping malformed credential record");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !record.status.is_active() {
            return Ok(false);
        }
        check_secret(&record.password_hash, secret).await
    }

    /// Verify and return the decoded record, for login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AuthFailure` for unknown or disabled identities and
    /// wrong secrets. The message does not reveal which.
    pub async fn authenticate(&self, identity: &str, secret: &str) -> AuthResult<CredentialRecord> {
        if !self.verify(identity, secret).await? {
            return Err(AuthError::auth_failure("invalid identity or secret"));
        }
        self.record(identity)
            .await?
            .ok_or_else(|| AuthError::auth_failure("invalid identity or secret"))
    }

    /// Change the secret for `identity`.
    ///
    /// The old secret is required unless an administrator is changing another
    /// account. The new hash is always Argon2id.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if a non-admin targets another account
    /// - `NotFound` if the identity has no record
    /// - `AuthFailure` if the old secret is missing or wrong
    /// - `PolicyViolation` if the new secret is too short
    pub async fn change_secret(
        &self,
        actor: &Actor,
        identity: &str,
        old_secret: Option<&str>,
        new_secret: &str,
    ) -> AuthResult<()> {
        let acting_on_self = actor.identity == identity;
        if !acting_on_self && !actor.is_admin {
            return Err(AuthError::forbidden(
                "only administrators can change another account's secret",
            ));
        }

        let now = self.clock.now();
        let modified = self.timestamp(now)?;
        let modified = modified.as_str();
        let min = self.policy.min_secret_length;

        self.update_record(identity, move |mut record| async move {
            if acting_on_self || !actor.is_admin {
                let old = old_secret.ok_or_else(|| AuthError::auth_failure("current secret required"))?;
                if !check_secret(&record.password_hash, old).await? {
                    return Err(AuthError::auth_failure("current secret does not match"));
                }
            }
            if new_secret.chars().count() < min {
                return Err(AuthError::policy_violation(format!(
                    "secret must be at least {min} characters"
                )));
            }
            record.password_hash = PasswordHash::Argon2(hash_secret(new_secret).await?);
            record.touch(&actor.identity, modified);
            Ok(Some(record))
        })
        .await?;
        self.storage
            .append_audit(AuditEntry::new(now, &actor.identity, identity, AuditField::Password))
            .await?;

        tracing::info!(actor = %actor.identity, target = %identity, "Secret changed");
        Ok(())
    }

    /// Create records for roster identities that have none locally.
    ///
    /// Existing records are never modified. Each insert is an atomic
    /// insert-if-absent, so a concurrent writer always wins over the roster.
    pub async fn upsert_from_external_roster<I, S>(&self, candidates: I) -> AuthResult<RosterSyncReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = candidates
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let mut report = RosterSyncReport::default();
        for identity in unique {
            if self.storage.get(&identity).await?.is_some() {
                report.preserved.push(identity);
                continue;
            }

            let now = self.clock.now();
            let created = self.timestamp(now)?;
            let mut record = CredentialRecord::new(
                identity.as_str(),
                PasswordHash::Argon2(hash_secret(&self.policy.default_secret).await?),
                self.policy.is_legacy_admin(&identity),
            );
            record.metadata = RecordMetadata {
                created_by: Some(ROSTER_ACTOR.to_string()),
                created_date: Some(created),
                modified_by: None,
                modified_date: None,
            };

            if self.storage.insert_if_absent(&identity, record.encode()).await? {
                self.storage
                    .append_audit(AuditEntry::new(now, ROSTER_ACTOR, &identity, AuditField::Account))
                    .await?;
                report.added.push(identity);
            } else {
                report.preserved.push(identity);
            }
        }

        tracing::info!(
            added = report.added.len(),
            preserved = report.preserved.len(),
            "Roster synchronized"
        );
        Ok(report)
    }

    /// Delete the record for `identity`.
    ///
    /// # Errors
    ///
    /// - `Protected` for built-in administrative identities, whoever asks
    /// - `Forbidden` if the actor is not an administrator
    /// - `NotFound` if there is no record
    pub async fn delete(&self, actor: &Actor, identity: &str) -> AuthResult<()> {
        if self.policy.is_protected(identity) {
            tracing::warn!(actor = %actor.identity, target = %identity, "Refused to delete protected account");
            return Err(AuthError::protected(identity));
        }
        if !actor.is_admin {
            return Err(AuthError::forbidden("only administrators can delete accounts"));
        }
        if !self.storage.remove(identity).await? {
            return Err(AuthError::not_found(identity));
        }

        self.storage
            .append_audit(AuditEntry::new(
                self.clock.now(),
                &actor.identity,
                identity,
                AuditField::Deleted,
            ))
            .await?;
        tracing::info!(actor = %actor.identity, target = %identity, "Account deleted");
        Ok(())
    }

    /// Grant or revoke admin privileges. The hash scheme is kept.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admin actors, `Protected` when revoking the
    /// primary admin, `NotFound` for unknown identities.
    pub async fn set_admin(&self, actor: &Actor, identity: &str, is_admin: bool) -> AuthResult<()> {
        if !actor.is_admin {
            return Err(AuthError::forbidden("only administrators can change roles"));
        }
        if !is_admin && identity == self.policy.primary_admin {
            return Err(AuthError::protected(identity));
        }

        let now = self.clock.now();
        let modified = self.timestamp(now)?;
        let modified = modified.as_str();
        let updated = self
            .update_record(identity, move |mut record| async move {
                if record.is_admin == is_admin {
                    return Ok(None);
                }
                record.is_admin = is_admin;
                record.touch(&actor.identity, modified);
                Ok(Some(record))
            })
            .await?;
        let Some((previous, _)) = updated else {
            return Ok(());
        };

        self.storage
            .append_audit(
                AuditEntry::new(now, &actor.identity, identity, AuditField::IsAdmin)
                    .with_change(previous.is_admin.to_string(), is_admin.to_string()),
            )
            .await?;

        tracing::info!(actor = %actor.identity, target = %identity, is_admin, "Admin flag changed");
        Ok(())
    }

    /// Enable or disable an account.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admin actors, `Protected` when disabling a
    /// protected identity, `NotFound` for unknown identities.
    pub async fn set_status(
        &self,
        actor: &Actor,
        identity: &str,
        status: AccountStatus,
    ) -> AuthResult<()> {
        if !actor.is_admin {
            return Err(AuthError::forbidden("only administrators can change account status"));
        }
        if status == AccountStatus::Disabled && self.policy.is_protected(identity) {
            return Err(AuthError::protected(identity));
        }

        let now = self.clock.now();
        let modified = self.timestamp(now)?;
        let modified = modified.as_str();
        let updated = self
            .update_record(identity, move |mut record| async move {
                if record.status == status {
                    return Ok(None);
                }
                record.status = status;
                record.touch(&actor.identity, modified);
                Ok(Some(record))
            })
            .await?;
        let Some((previous, _)) = updated else {
            return Ok(());
        };

        self.storage
            .append_audit(
                AuditEntry::new(now, &actor.identity, identity, AuditField::Status)
                    .with_change(previous.status.as_str(), status.as_str()),
            )
            .await?;

        tracing::info!(actor = %actor.identity, target = %identity, status = status.as_str(), "Account status changed");
        Ok(())
    }

    /// All decodable records, ordered by identity. Malformed records are
    /// logged and skipped.
    pub async fn list(&self) -> AuthResult<Vec<CredentialRecord>> {
        let stored = self.storage.list().await?;
        let mut records = Vec::with_capacity(stored.len());
        for (identity, value) in &stored {
            match CredentialRecord::decode(identity, value, &self.policy) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(identity = %identity, error = %e, "Skipping malformed credential record"),
            }
        }
        Ok(records)
    }

    pub async fn audit_log(&self) -> AuthResult<Vec<AuditEntry>> {
        self.storage.audit_log().await
    }

    /// Apply `change` to the current record and write the result back only
    /// if nobody else wrote the record in between. A lost race re-reads and
    /// applies `change` again.
    ///
    /// `change` returns `None` when no write is needed. On success returns
    /// the record as read and as written.
    async fn update_record<F, Fut>(
        &self,
        identity: &str,
        mut change: F,
    ) -> AuthResult<Option<(CredentialRecord, CredentialRecord)>>
    where
        F: FnMut(CredentialRecord) -> Fut,
        Fut: Future<Output = AuthResult<Option<CredentialRecord>>>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let stored = self
                .storage
                .get(identity)
                .await?
                .ok_or_else(|| AuthError::not_found(identity))?;
            let current = CredentialRecord::decode(identity, &stored, &self.policy)?;
            let Some(next) = change(current.clone()).await? else {
                return Ok(None);
            };
            if self
                .storage
                .replace_if_unchanged(identity, &stored, next.encode())
                .await?
            {
                return Ok(Some((current, next)));
            }
            tracing::debug!(identity = %identity, attempt, "Credential record changed concurrently, retrying");
        }
        Err(AuthError::storage(format!(
            "record for '{identity}' kept changing during update"
        )))
    }

    fn timestamp(&self, at: time::OffsetDateTime) -> AuthResult<String> {
        at.format(&Rfc3339)
            .map_err(|e| AuthError::internal(format!("failed to format timestamp: {e}")))
    }
}

/// Compare `secret` against a stored hash. Argon2 runs on the blocking pool.
pub(crate) async fn check_secret(stored: &PasswordHash, secret: &str) -> AuthResult<bool> {
    match stored {
        PasswordHash::Sha256(digest) => Ok(hash::verify_sha256(secret, digest)),
        PasswordHash::Argon2(phc) => {
            let phc = phc.clone();
            let secret = secret.to_string();
            tokio::task::spawn_blocking(move || hash::verify_argon2(&secret, &phc))
                .await
                .map_err(|e| AuthError::internal(format!("verification task failed: {e}")))?
                .map_err(|e| AuthError::internal(format!("stored hash is not valid PHC: {e}")))
        }
    }
}

async fn hash_secret(secret: &str) -> AuthResult<String> {
    let secret = secret.to_string();
    tokio::task::spawn_blocking(move || hash::hash_argon2(&secret))
        .await
        .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))?
        .map_err(|e| AuthError::internal(format!("failed to hash secret: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::hash::sha256_hex;
    use crate::credentials::{FormatVersion, StoredCredential};
    use crate::storage::MemoryCredentialStorage;
    use async_trait::async_trait;
    use drivr_core::ManualClock;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use time::macros::datetime;
    use tokio::sync::Notify;

    fn store_with(records: Vec<(&str, serde_json::Value)>) -> (CredentialStore, Arc<MemoryCredentialStorage>) {
        let storage = Arc::new(MemoryCredentialStorage::with_records(
            records
                .into_iter()
                .map(|(id, v)| (id.to_string(), serde_json::from_value::<StoredCredential>(v).unwrap())),
        ));
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 12:00 UTC)));
        let store = CredentialStore::new(storage.clone(), CredentialConfig::default(), clock);
        (store, storage)
    }

    fn admin() -> Actor {
        Actor::new("admin", true)
    }

    /// Storage whose next `get` hands back its value only after `release`,
    /// so a read-modify-write can be overtaken by another writer.
    struct GatedStorage {
        inner: MemoryCredentialStorage,
        hold_next_get: AtomicBool,
        reached: Notify,
        release: Notify,
    }

    impl GatedStorage {
        fn new(inner: MemoryCredentialStorage) -> Self {
            Self {
                inner,
                hold_next_get: AtomicBool::new(false),
                reached: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl CredentialStorage for GatedStorage {
        async fn get(&self, identity: &str) -> AuthResult<Option<StoredCredential>> {
            let value = self.inner.get(identity).await?;
            if self.hold_next_get.swap(false, Ordering::SeqCst) {
                self.reached.notify_one();
                self.release.notified().await;
            }
            Ok(value)
        }

        async fn list(&self) -> AuthResult<BTreeMap<String, StoredCredential>> {
            self.inner.list().await
        }

        async fn insert_if_absent(&self, identity: &str, value: StoredCredential) -> AuthResult<bool> {
            self.inner.insert_if_absent(identity, value).await
        }

        async fn replace_if_unchanged(
            &self,
            identity: &str,
            expected: &StoredCredential,
            value: StoredCredential,
        ) -> AuthResult<bool> {
            self.inner.replace_if_unchanged(identity, expected, value).await
        }

        async fn remove(&self, identity: &str) -> AuthResult<bool> {
            self.inner.remove(identity).await
        }

        async fn append_audit(&self, entry: AuditEntry) -> AuthResult<()> {
            self.inner.append_audit(entry).await
        }

        async fn audit_log(&self) -> AuthResult<Vec<AuditEntry>> {
            self.inner.audit_log().await
        }
    }

    fn gated_store() -> (Arc<CredentialStore>, Arc<GatedStorage>) {
        let storage = Arc::new(GatedStorage::new(MemoryCredentialStorage::with_records([(
            "driver7".to_string(),
            StoredCredential::Legacy(sha256_hex("oldsecret")),
        )])));
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 12:00 UTC)));
        let store = Arc::new(CredentialStore::new(
            storage.clone(),
            CredentialConfig::default(),
            clock,
        ));
        (store, storage)
    }

    #[tokio::test]
    async fn test_verify_legacy_v1_and_v2() {
        let v2 = hash::hash_argon2("argon-pass").unwrap();
        let (store, _) = store_with(vec![
            ("trooper1", serde_json::json!(sha256_hex("legacy-pass"))),
            ("driver7", serde_json::json!({ "password": sha256_hex("v1-pass") })),
            ("driver8", serde_json::json!({ "version": 2, "password": v2 })),
        ]);

        assert!(store.verify("trooper1", "legacy-pass").await.unwrap());
        assert!(!store.verify("trooper1", "v1-pass").await.unwrap());
        assert!(store.verify("driver7", "v1-pass").await.unwrap());
        assert!(store.verify("driver8", "argon-pass").await.unwrap());
        assert!(!store.verify("driver8", "wrong").await.unwrap());
        assert!(!store.verify("nobody", "anything").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_account_never_verifies() {
        let (store, _) = store_with(vec![(
            "driver7",
            serde_json::json!({ "password": sha256_hex("pw"), "status": "disabled" }),
        )]);
        assert!(!store.verify("driver7", "pw").await.unwrap());
        assert!(matches!(
            store.authenticate("driver7", "pw").await,
            Err(AuthError::AuthFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_verify() {
        let (store, _) = store_with(vec![("driver7", serde_json::json!("not-a-digest"))]);
        assert!(!store.verify("driver7", "not-a-digest").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_service_change_requires_old_secret() {
        let (store, _) = store_with(vec![("driver7", serde_json::json!(sha256_hex("oldsecret")))]);
        let me = Actor::new("driver7", false);

        let err = store
            .change_secret(&me, "driver7", Some("wrong"), "newsecret1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthFailure { .. }));

        let err = store
            .change_secret(&me, "driver7", None, "newsecret1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthFailure { .. }));

        let err = store
            .change_secret(&me, "driver7", Some("oldsecret"), "short")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PolicyViolation { .. }));

        store
            .change_secret(&me, "driver7", Some("oldsecret"), "newsecret1")
            .await
            .unwrap();
        assert!(store.verify("driver7", "newsecret1").await.unwrap());
        assert!(!store.verify("driver7", "oldsecret").await.unwrap());

        let record = store.record("driver7").await.unwrap().unwrap();
        assert_eq!(record.format, FormatVersion::StructuredV2);
        assert_eq!(record.metadata.modified_by.as_deref(), Some("driver7"));

        let log = store.audit_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].field, AuditField::Password);
        assert!(log[0].old.is_none() && log[0].new.is_none());
    }

    #[tokio::test]
    async fn test_admin_resets_other_account_without_old_secret() {
        let (store, _) = store_with(vec![("driver7", serde_json::json!(sha256_hex("forgotten")))]);
        store
            .change_secret(&admin(), "driver7", None, "reset-secret")
            .await
            .unwrap();
        assert!(store.verify("driver7", "reset-secret").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_admin_cannot_change_other_account() {
        let (store, _) = store_with(vec![
            ("driver7", serde_json::json!(sha256_hex("pw7"))),
            ("driver8", serde_json::json!(sha256_hex("pw8"))),
        ]);
        let err = store
            .change_secret(&Actor::new("driver7", false), "driver8", Some("pw8"), "newsecret1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_roster_upsert_preserves_existing_records() {
        let existing = serde_json::json!({ "password": sha256_hex("mine"), "is_admin": true });
        let (store, storage) = store_with(vec![("driver7", existing.clone())]);

        let report = store
            .upsert_from_external_roster(["driver7", "driver9", " ", "driver9"])
            .await
            .unwrap();
        assert_eq!(report.added, vec!["driver9".to_string()]);
        assert_eq!(report.preserved, vec!["driver7".to_string()]);

        let untouched = storage.get("driver7").await.unwrap().unwrap();
        assert_eq!(untouched, serde_json::from_value::<StoredCredential>(existing).unwrap());
        assert!(store.verify("driver9", "secret123").await.unwrap());

        let added = store.record("driver9").await.unwrap().unwrap();
        assert_eq!(added.metadata.created_by.as_deref(), Some(ROSTER_ACTOR));
        assert!(!added.is_admin);
    }

    #[tokio::test]
    async fn test_protected_delete_rejected_for_any_caller() {
        let (store, _) = store_with(vec![
            ("admin", serde_json::json!(sha256_hex("a"))),
            ("commander", serde_json::json!(sha256_hex("c"))),
            ("driver7", serde_json::json!(sha256_hex("d"))),
        ]);

        for target in ["admin", "commander", "trooper1"] {
            for actor in [admin(), Actor::new("driver7", false)] {
                let err = store.delete(&actor, target).await.unwrap_err();
                assert!(matches!(err, AuthError::Protected { .. }), "{target}");
            }
        }

        let err = store
            .delete(&Actor::new("driver7", false), "driver7")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden { .. }));

        store.delete(&admin(), "driver7").await.unwrap();
        let err = store.delete(&admin(), "driver7").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_set_admin_keeps_hash_scheme_and_audits() {
        let (store, _) = store_with(vec![("driver7", serde_json::json!(sha256_hex("pw")))]);
        store.set_admin(&admin(), "driver7", true).await.unwrap();

        let record = store.record("driver7").await.unwrap().unwrap();
        assert!(record.is_admin);
        assert_eq!(record.format, FormatVersion::StructuredV1);
        assert!(store.verify("driver7", "pw").await.unwrap());

        // No-op change writes nothing.
        store.set_admin(&admin(), "driver7", true).await.unwrap();
        let log = store.audit_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].old.as_deref(), Some("false"));
        assert_eq!(log[0].new.as_deref(), Some("true"));

        let err = store.set_admin(&admin(), "admin", false).await.unwrap_err();
        assert!(matches!(err, AuthError::Protected { .. }));
    }

    #[tokio::test]
    async fn test_set_status_disables_login() {
        let (store, _) = store_with(vec![("driver7", serde_json::json!(sha256_hex("pw")))]);
        store
            .set_status(&admin(), "driver7", AccountStatus::Disabled)
            .await
            .unwrap();
        assert!(!store.verify("driver7", "pw").await.unwrap());

        let err = store
            .set_status(&admin(), "commander", AccountStatus::Disabled)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Protected { .. }));

        let err = store
            .set_status(&Actor::new("driver7", false), "driver7", AccountStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_overtaken_role_change_keeps_new_secret() {
        let (store, storage) = gated_store();
        storage.hold_next_get.store(true, Ordering::SeqCst);

        let role_change = {
            let store = store.clone();
            tokio::spawn(async move { store.set_admin(&admin(), "driver7", true).await })
        };
        storage.reached.notified().await;

        store
            .change_secret(&Actor::new("driver7", false), "driver7", Some("oldsecret"), "brandnew99")
            .await
            .unwrap();
        storage.release.notify_one();
        role_change.await.unwrap().unwrap();

        assert!(store.verify("driver7", "brandnew99").await.unwrap());
        assert!(!store.verify("driver7", "oldsecret").await.unwrap());
        let record = store.record("driver7").await.unwrap().unwrap();
        assert!(record.is_admin);
        assert_eq!(record.format, FormatVersion::StructuredV2);

        let fields: Vec<AuditField> = store.audit_log().await.unwrap().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec![AuditField::Password, AuditField::IsAdmin]);
    }

    #[tokio::test]
    async fn test_update_overtaken_by_delete_does_not_resurrect() {
        let (store, storage) = gated_store();
        storage.hold_next_get.store(true, Ordering::SeqCst);

        let disable = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_status(&admin(), "driver7", AccountStatus::Disabled)
                    .await
            })
        };
        storage.reached.notified().await;

        store.delete(&admin(), "driver7").await.unwrap();
        storage.release.notify_one();

        let err = disable.await.unwrap().unwrap_err();
        assert!(matches!(err, AuthError::NotFound { .. }));
        assert!(store.record("driver7").await.unwrap().is_none());
    }
}
