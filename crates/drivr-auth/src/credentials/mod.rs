//! Credential records and the store adapter over them.

pub mod hash;
mod protection;
mod record;
mod store;

pub use record::{
    AccountStatus, CredentialRecord, FormatVersion, PasswordHash, RecordMetadata,
    StoredCredential, StructuredCredential, VERSION_ARGON2, VERSION_SHA256,
};
pub use store::{Actor, CredentialStore, ROSTER_ACTOR, RosterSyncReport};
