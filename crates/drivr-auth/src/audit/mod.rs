//! Credential change audit trail.
//!
//! Every mutation of a credential record appends one [`AuditEntry`]. The
//! sequence is append-only. Entries for secret changes never carry the old
//! or new hash.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Field of a credential record touched by a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditField {
    /// The account was created.
    Account,
    /// The secret hash changed.
    Password,
    /// Admin privileges were granted or revoked.
    IsAdmin,
    /// The account was enabled or disabled.
    Status,
    /// The account was deleted.
    Deleted,
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the change was applied.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Identity that performed the change.
    pub actor: String,

    /// Identity whose record changed.
    pub target: String,

    /// Which field changed.
    pub field: AuditField,

    /// Previous value, when it is safe to record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,

    /// New value, when it is safe to record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

impl AuditEntry {
    /// Create an entry without old/new values.
    pub fn new(
        timestamp: OffsetDateTime,
        actor: impl Into<String>,
        target: impl Into<String>,
        field: AuditField,
    ) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            target: target.into(),
            field,
            old: None,
            new: None,
        }
    }

    /// Attach the old and new values.
    #[must_use]
    pub fn with_change(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old = Some(old.into());
        self.new = Some(new.into());
        self
    }
}
