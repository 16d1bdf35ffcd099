//! Credential record formats.
//!
//! The credential file maps identity to a stored value in one of two layouts:
//!
//! ```json
//! {
//!   "trooper1": "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8",
//!   "driver7": {
//!     "version": 2,
//!     "password": "$argon2id$v=19$...",
//!     "is_admin": false,
//!     "status": "active",
//!     "created_by": "roster-sync",
//!     "created_date": "2025-03-01T08:00:00Z"
//!   }
//! }
//! ```
//!
//! The bare string is the legacy flat layout (a SHA-256 hex digest, no role
//! flags). Both layouts are accepted on read. [`StoredCredential`] is the
//! on-disk form and [`CredentialRecord`] the normalized in-memory form.
//! Writes always produce the structured layout for the record being written.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::AuthResult;
use crate::config::CredentialConfig;
use crate::error::AuthError;

/// Structured layout version whose `password` is a SHA-256 hex digest.
pub const VERSION_SHA256: u32 = 1;

/// Structured layout version whose `password` is an Argon2 PHC string.
pub const VERSION_ARGON2: u32 = 2;

/// On-disk credential value, in either layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredCredential {
    /// Legacy flat layout: the SHA-256 hex digest of the secret.
    Legacy(String),
    /// Structured layout with role flags and metadata.
    Structured(StructuredCredential),
    /// Any other value. Kept verbatim so rewriting the file does not drop it;
    /// decoding reports it as malformed.
    Unrecognized(Value),
}

/// Structured on-disk credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredCredential {
    /// Layout version. Determines the hash scheme of `password`.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Secret hash.
    pub password: String,

    #[serde(default)]
    pub is_admin: bool,

    #[serde(default)]
    pub status: AccountStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<String>,

    /// Unknown fields, preserved across rewrites.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u32 {
    VERSION_SHA256
}

/// Whether an account may authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Disabled,
}

impl AccountStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

/// Stored secret hash and its scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordHash {
    /// Unsalted SHA-256 hex digest.
    Sha256(String),
    /// Argon2 PHC string.
    Argon2(String),
}

impl PasswordHash {
    /// The raw stored hash text.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sha256(h) | Self::Argon2(h) => h,
        }
    }

    fn version(&self) -> u32 {
        match self {
            Self::Sha256(_) => VERSION_SHA256,
            Self::Argon2(_) => VERSION_ARGON2,
        }
    }
}

/// Layout a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatVersion {
    LegacyFlat,
    StructuredV1,
    StructuredV2,
}

/// Audit metadata carried by structured records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub created_by: Option<String>,
    pub created_date: Option<String>,
    pub modified_by: Option<String>,
    pub modified_date: Option<String>,
}

/// Normalized credential record.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub identity: String,
    pub password_hash: PasswordHash,
    pub is_admin: bool,
    pub status: AccountStatus,
    /// Layout the record was read from. Records built in memory report the
    /// layout they will be written as.
    pub format: FormatVersion,
    pub metadata: RecordMetadata,
    extra: Map<String, Value>,
}

impl CredentialRecord {
    /// Build a fresh structured record.
    pub fn new(identity: impl Into<String>, password_hash: PasswordHash, is_admin: bool) -> Self {
        let format = match password_hash {
            PasswordHash::Sha256(_) => FormatVersion::StructuredV1,
            PasswordHash::Argon2(_) => FormatVersion::StructuredV2,
        };
        Self {
            identity: identity.into(),
            password_hash,
            is_admin,
            status: AccountStatus::Active,
            format,
            metadata: RecordMetadata::default(),
            extra: Map::new(),
        }
    }

    /// Decode a stored value.
    ///
    /// Legacy records take their admin flag from the configured legacy admin
    /// list. The primary admin is always an administrator.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MalformedRecord` if the hash does not match the
    /// scheme its layout declares.
    pub fn decode(
        identity: &str,
        stored: &StoredCredential,
        policy: &CredentialConfig,
    ) -> AuthResult<Self> {
        match stored {
            StoredCredential::Legacy(digest) => {
                ensure_sha256_digest(identity, digest)?;
                Ok(Self {
                    identity: identity.to_string(),
                    password_hash: PasswordHash::Sha256(digest.trim().to_ascii_lowercase()),
                    is_admin: policy.is_legacy_admin(identity),
                    status: AccountStatus::Active,
                    format: FormatVersion::LegacyFlat,
                    metadata: RecordMetadata::default(),
                    extra: Map::new(),
                })
            }
            StoredCredential::Structured(s) => {
                let (password_hash, format) = match s.version {
                    VERSION_SHA256 => {
                        ensure_sha256_digest(identity, &s.password)?;
                        (
                            PasswordHash::Sha256(s.password.trim().to_ascii_lowercase()),
                            FormatVersion::StructuredV1,
                        )
                    }
                    VERSION_ARGON2 => {
                        if !s.password.starts_with("$argon2") {
                            return Err(AuthError::malformed(
                                identity,
                                "version 2 record does not hold an argon2 hash",
                            ));
                        }
                        (
                            PasswordHash::Argon2(s.password.clone()),
                            FormatVersion::StructuredV2,
                        )
                    }
                    other => {
                        return Err(AuthError::malformed(
                            identity,
                            format!("unsupported record version {other}"),
                        ));
                    }
                };

                Ok(Self {
                    identity: identity.to_string(),
                    password_hash,
                    is_admin: s.is_admin || identity == policy.primary_admin,
                    status: s.status,
                    format,
                    metadata: RecordMetadata {
                        created_by: s.created_by.clone(),
                        created_date: s.created_date.clone(),
                        modified_by: s.modified_by.clone(),
                        modified_date: s.modified_date.clone(),
                    },
                    extra: s.extra.clone(),
                })
            }
            StoredCredential::Unrecognized(_) => Err(AuthError::malformed(
                identity,
                "value matches neither the flat nor the structured layout",
            )),
        }
    }

    /// Encode for storage. Always produces the structured layout.
    pub fn encode(&self) -> StoredCredential {
        StoredCredential::Structured(StructuredCredential {
            version: self.password_hash.version(),
            password: self.password_hash.as_str().to_string(),
            is_admin: self.is_admin,
            status: self.status,
            created_by: self.metadata.created_by.clone(),
            created_date: self.metadata.created_date.clone(),
            modified_by: self.metadata.modified_by.clone(),
            modified_date: self.metadata.modified_date.clone(),
            extra: self.extra.clone(),
        })
    }

    /// Record the actor and time of a modification.
    pub fn touch(&mut self, actor: &str, at: &str) {
        self.metadata.modified_by = Some(actor.to_string());
        self.metadata.modified_date = Some(at.to_string());
    }
}

fn ensure_sha256_digest(identity: &str, digest: &str) -> AuthResult<()> {
    let digest = digest.trim();
    if digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(AuthError::malformed(identity, "expected a SHA-256 hex digest"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::hash::sha256_hex;

    fn policy() -> CredentialConfig {
        CredentialConfig::default()
    }

    #[test]
    fn test_legacy_record_decodes() {
        let stored: StoredCredential =
            serde_json::from_value(serde_json::json!(sha256_hex("secret123"))).unwrap();
        let record = CredentialRecord::decode("trooper1", &stored, &policy()).unwrap();
        assert_eq!(record.format, FormatVersion::LegacyFlat);
        assert!(record.is_admin);
        assert!(matches!(record.password_hash, PasswordHash::Sha256(_)));

        let record = CredentialRecord::decode("driver7", &stored, &policy()).unwrap();
        assert!(!record.is_admin);
    }

    #[test]
    fn test_structured_record_decodes_and_keeps_unknown_fields() {
        let stored: StoredCredential = serde_json::from_value(serde_json::json!({
            "password": sha256_hex("pw"),
            "is_admin": true,
            "created_by": "admin",
            "created_date": "2024-05-01 10:00:00",
            "unit": "alpha"
        }))
        .unwrap();
        let record = CredentialRecord::decode("driver7", &stored, &policy()).unwrap();
        assert_eq!(record.format, FormatVersion::StructuredV1);
        assert!(record.is_admin);
        assert_eq!(record.metadata.created_by.as_deref(), Some("admin"));

        let StoredCredential::Structured(encoded) = record.encode() else {
            panic!("expected structured layout");
        };
        assert_eq!(encoded.version, VERSION_SHA256);
        assert_eq!(encoded.extra.get("unit"), Some(&serde_json::json!("alpha")));
    }

    #[test]
    fn test_primary_admin_always_admin() {
        let stored = StoredCredential::Structured(StructuredCredential {
            version: VERSION_SHA256,
            password: sha256_hex("pw"),
            is_admin: false,
            status: AccountStatus::Active,
            created_by: None,
            created_date: None,
            modified_by: None,
            modified_date: None,
            extra: Map::new(),
        });
        let record = CredentialRecord::decode("admin", &stored, &policy()).unwrap();
        assert!(record.is_admin);
    }

    #[test]
    fn test_malformed_records_rejected() {
        let stored = StoredCredential::Legacy("plaintext".to_string());
        let err = CredentialRecord::decode("x", &stored, &policy()).unwrap_err();
        assert!(matches!(err, AuthError::MalformedRecord { .. }));

        let stored: StoredCredential = serde_json::from_value(serde_json::json!({
            "version": 2,
            "password": sha256_hex("pw")
        }))
        .unwrap();
        assert!(CredentialRecord::decode("x", &stored, &policy()).is_err());

        let stored: StoredCredential = serde_json::from_value(serde_json::json!({
            "version": 9,
            "password": "whatever"
        }))
        .unwrap();
        assert!(CredentialRecord::decode("x", &stored, &policy()).is_err());
    }

    #[test]
    fn test_unknown_layout_is_kept_but_not_decoded() {
        let raw = serde_json::json!({ "password": sha256_hex("pw"), "status": "suspended" });
        let stored: StoredCredential = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(stored, StoredCredential::Unrecognized(_)));

        let err = CredentialRecord::decode("driver7", &stored, &policy()).unwrap_err();
        assert!(matches!(err, AuthError::MalformedRecord { .. }));
        assert_eq!(serde_json::to_value(&stored).unwrap(), raw);

        let stored: StoredCredential =
            serde_json::from_value(serde_json::json!({ "password": 42 })).unwrap();
        assert!(matches!(stored, StoredCredential::Unrecognized(_)));
    }

    #[test]
    fn test_encode_omits_absent_metadata() {
        let record = CredentialRecord::new(
            "driver7",
            PasswordHash::Argon2("$argon2id$v=19$stub".to_string()),
            false,
        );
        let json = serde_json::to_value(record.encode()).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(json["status"], "active");
        assert!(json.get("created_by").is_none());
    }
}
