//! Password hashing via bcrypt.

use std::sync::LazyLock;

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Hash checked when the account does not exist, at the same cost as real ones.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| bcrypt::hash("vipbar-no-such-account", BCRYPT_COST).ok());

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// A malformed stored hash counts as a mismatch rather than an error; the
/// caller cannot do anything more useful with it.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a valid bcrypt hash");
            false
        }
    }
}

/// Spend one bcrypt verification on an unknown account so a miss costs
/// as much as a wrong password. Always `false`.
pub fn verify_unknown_account(password: &str) -> bool {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = bcrypt::verify(password, hash);
    }
    false
}
