//! Secret hashing and verification.
//!
//! Two schemes coexist:
//!
//! - **SHA-256 hex** - unsalted digests written by the legacy account screens.
//!   Verified by hashing the candidate and comparing digests in constant time.
//! - **Argon2id** - salted PHC strings. Every secret written today uses this.
//!
//! Raw secrets are never compared directly.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compute the SHA-256 digest of `secret` as lowercase hex.
pub fn sha256_hex(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify `secret` against a stored SHA-256 hex digest.
///
/// The stored digest is compared case-insensitively and in constant time.
pub fn verify_sha256(secret: &str, stored_hex: &str) -> bool {
    let candidate = sha256_hex(secret);
    let stored = stored_hex.trim().to_ascii_lowercase();
    candidate.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Hash a secret for storage using Argon2id.
///
/// Uses a fresh OsRng salt and the default Argon2 parameters. The returned
/// PHC string embeds both.
///
/// # Errors
///
/// Returns `argon2::password_hash::Error` if hashing fails (rare).
pub fn hash_argon2(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify `secret` against a stored Argon2 PHC string.
///
/// # Errors
///
/// Returns `Err` only if the stored hash is not a valid PHC string.
pub fn verify_argon2(secret: &str, phc: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(phc)?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}
