//! # drivr-auth
//!
//! Session management and credential storage for the DRIVr engine.
//!
//! This crate provides:
//! - Opaque bearer sessions with sliding inactivity expiration
//! - A credential store reading both the legacy flat and structured layouts
//! - Safeguards for built-in administrative accounts
//! - An append-only audit trail of credential changes
//!
//! ## Modules
//!
//! - [`config`] - Session and credential policy configuration
//! - [`session`] - Session issuance, validation and sweeping
//! - [`credentials`] - Record decoding, secret hashing, the store adapter
//! - [`storage`] - Storage traits with in-memory and file backends
//! - [`audit`] - Credential change audit entries

pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod session;
pub mod storage;

pub use audit::{AuditEntry, AuditField};
pub use config::{AuthConfig, ConfigError, CredentialConfig, SessionConfig};
pub use credentials::{
    AccountStatus, Actor, CredentialRecord, CredentialStore, FormatVersion, PasswordHash,
    RosterSyncReport, StoredCredential,
};
pub use error::{AuthError, ErrorCategory};
pub use session::{Session, SessionManager, SessionValidation};
pub use storage::{
    CredentialStorage, FileCredentialStorage, MemoryCredentialStorage, MemorySessionStorage,
    SessionStorage,
};

/// Type alias for session and credential results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use drivr_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::credentials::{AccountStatus, Actor, CredentialStore, RosterSyncReport};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::session::{Session, SessionManager, SessionValidation};
    pub use crate::storage::{CredentialStorage, SessionStorage};
}
