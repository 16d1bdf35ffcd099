//! File-backed credential storage.
//!
//! Credentials live in one JSON object mapping identity to stored value.
//! Every write replaces the file through a temporary sibling and a rename, so
//! readers never observe a partially written file. The audit trail is a
//! JSON-lines file next to it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::CredentialStorage;
use crate::AuthResult;
use crate::audit::AuditEntry;
use crate::credentials::StoredCredential;
use crate::error::AuthError;

/// Name of the rolling protected backup written next to timestamped ones.
pub const PROTECTED_BACKUP_NAME: &str = "credentials_protected.json";

/// Credential storage persisted to a JSON file.
///
/// The file is loaded once on open. All writes go through a single mutex and
/// are flushed to disk before the in-memory copy is updated.
#[derive(Debug)]
pub struct FileCredentialStorage {
    path: PathBuf,
    audit_path: PathBuf,
    records: Mutex<BTreeMap<String, StoredCredential>>,
}

impl FileCredentialStorage {
    /// Open the credential file at `path`. A missing file is treated as empty.
    ///
    /// The audit trail is written to `<path>.audit.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the file exists but cannot be read or
    /// is not a JSON object. Individual records that match neither layout are
    /// kept verbatim and reported as malformed when decoded.
    pub async fn open(path: impl Into<PathBuf>) -> AuthResult<Self> {
        let path = path.into();
        let audit_path = path.with_extension("audit.jsonl");
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_records(&bytes, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(AuthError::storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            "Opened credential file"
        );

        Ok(Self {
            path,
            audit_path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a timestamped snapshot into `dir` and refresh the protected copy.
    ///
    /// Returns the path of the timestamped snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if either file cannot be written.
    pub async fn backup(&self, dir: &Path, now: OffsetDateTime) -> AuthResult<PathBuf> {
        let records = self.records.lock().await;
        let stamp = now
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .map_err(|e| AuthError::internal(format!("failed to format timestamp: {e}")))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AuthError::storage(format!("failed to create {}: {e}", dir.display())))?;

        let snapshot = dir.join(format!("credentials_{stamp}.json"));
        write_atomic(&snapshot, &records).await?;
        write_atomic(&dir.join(PROTECTED_BACKUP_NAME), &records).await?;

        tracing::info!(
            path = %snapshot.display(),
            records = records.len(),
            "Credential backup written"
        );
        Ok(snapshot)
    }

    /// Replace all credentials with the contents of a backup file.
    ///
    /// The backup is fully parsed before anything is replaced. Returns the
    /// number of restored records.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the backup is unreadable, is not a
    /// credential map, or is empty.
    pub async fn restore(&self, backup: &Path) -> AuthResult<usize> {
        let bytes = tokio::fs::read(backup).await.map_err(|e| {
            AuthError::storage(format!("failed to read {}: {e}", backup.display()))
        })?;
        let restored = parse_records(&bytes, backup)?;
        if restored.is_empty() {
            return Err(AuthError::storage(format!(
                "backup {} holds no credentials",
                backup.display()
            )));
        }

        let mut records = self.records.lock().await;
        write_atomic(&self.path, &restored).await?;
        let count = restored.len();
        *records = restored;

        tracing::warn!(
            backup = %backup.display(),
            records = count,
            "Credentials restored from backup"
        );
        Ok(count)
    }
}

fn parse_records(bytes: &[u8], path: &Path) -> AuthResult<BTreeMap<String, StoredCredential>> {
    serde_json::from_slice(bytes)
        .map_err(|e| AuthError::storage(format!("failed to parse {}: {e}", path.display())))
}

async fn write_atomic(path: &Path, records: &BTreeMap<String, StoredCredential>) -> AuthResult<()> {
    let json = serde_json::to_vec_pretty(records)
        .map_err(|e| AuthError::internal(format!("failed to serialize credentials: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| AuthError::storage(format!("failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AuthError::storage(format!("failed to replace {}: {e}", path.display())))
}

#[async_trait]
impl CredentialStorage for FileCredentialStorage {
    async fn get(&self, identity: &str) -> AuthResult<Option<StoredCredential>> {
        Ok(self.records.lock().await.get(identity).cloned())
    }

    async fn list(&self) -> AuthResult<BTreeMap<String, StoredCredential>> {
        Ok(self.records.lock().await.clone())
    }

    async fn insert_if_absent(&self, identity: &str, value: StoredCredential) -> AuthResult<bool> {
        let mut records = self.records.lock().await;
        if records.contains_key(identity) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.insert(identity.to_string(), value);
        write_atomic(&self.path, &next).await?;
        *records = next;
        Ok(true)
    }

    async fn replace_if_unchanged(
        &self,
        identity: &str,
        expected: &StoredCredential,
        value: StoredCredential,
    ) -> AuthResult<bool> {
        let mut records = self.records.lock().await;
        if records.get(identity) != Some(expected) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.insert(identity.to_string(), value);
        write_atomic(&self.path, &next).await?;
        *records = next;
        Ok(true)
    }

    async fn remove(&self, identity: &str) -> AuthResult<bool> {
        let mut records = self.records.lock().await;
        if !records.contains_key(identity) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(identity);
        write_atomic(&self.path, &next).await?;
        *records = next;
        Ok(true)
    }

    async fn append_audit(&self, entry: AuditEntry) -> AuthResult<()> {
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| AuthError::internal(format!("failed to serialize audit entry: {e}")))?;
        line.push(b'\n');

        // Serialize appends with credential writes.
        let _guard = self.records.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)
            .await
            .map_err(|e| {
                AuthError::storage(format!("failed to open {}: {e}", self.audit_path.display()))
            })?;
        file.write_all(&line)
            .await
            .map_err(|e| AuthError::storage(format!("failed to append audit entry: {e}")))?;
        file.flush()
            .await
            .map_err(|e| AuthError::storage(format!("failed to flush audit file: {e}")))
    }

    async fn audit_log(&self) -> AuthResult<Vec<AuditEntry>> {
        let content = match tokio::fs::read_to_string(&self.audit_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuthError::storage(format!(
                    "failed to read {}: {e}",
                    self.audit_path.display()
                )));
            }
        };

        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str(l)
                    .map_err(|e| AuthError::storage(format!("malformed audit line: {e}")))
            })
            .collect()
    }
}
