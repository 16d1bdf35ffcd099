//! Detection of accounts still using the roster default secret.

use super::record::CredentialRecord;
use super::store::{CredentialStore, check_secret};
use crate::AuthResult;

impl CredentialStore {
    /// Identities whose secret still matches the configured roster default.
    ///
    /// Disabled accounts are included; they would regain the default secret
    /// if re-enabled.
    pub async fn identities_with_default_secret(&self) -> AuthResult<Vec<String>> {
        let default_secret = self.policy().default_secret.clone();
        let mut flagged = Vec::new();
        for CredentialRecord {
            identity,
            password_hash,
            ..
        } in self.list().await?
        {
            if check_secret(&password_hash, &default_secret).await? {
                flagged.push(identity);
            }
        }

        if !flagged.is_empty() {
            tracing::warn!(count = flagged.len(), "Accounts still use the default secret");
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use drivr_core::ManualClock;
    use time::macros::datetime;

    use crate::config::CredentialConfig;
    use crate::credentials::hash::sha256_hex;
    use crate::credentials::{Actor, CredentialStore, StoredCredential};
    use crate::storage::MemoryCredentialStorage;

    #[tokio::test]
    async fn test_reports_default_secret_accounts() {
        let storage = Arc::new(MemoryCredentialStorage::with_records([
            (
                "trooper1".to_string(),
                StoredCredential::Legacy(sha256_hex("secret123")),
            ),
            (
                "driver7".to_string(),
                StoredCredential::Legacy(sha256_hex("changed-it")),
            ),
        ]));
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 12:00 UTC)));
        let store = CredentialStore::new(storage, CredentialConfig::default(), clock);

        store
            .upsert_from_external_roster(["driver9"])
            .await
            .unwrap();
        let flagged = store.identities_with_default_secret().await.unwrap();
        assert_eq!(flagged, vec!["driver9".to_string(), "trooper1".to_string()]);

        store
            .change_secret(&Actor::new("driver9", false), "driver9", Some("secret123"), "a-better-one")
            .await
            .unwrap();
        let flagged = store.identities_with_default_secret().await.unwrap();
        assert_eq!(flagged, vec!["trooper1".to_string()]);
    }
}
