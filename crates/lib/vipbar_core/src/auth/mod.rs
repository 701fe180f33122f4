//! Authentication and authorization logic.
//!
//! Provides the token codec, the credential store interface and its
//! implementations, password hashing, demo-mode credentials, role
//! permissions and sign-in input validation, shared by `vipbar_api` and the
//! server binary.

pub mod demo;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod queries;
pub mod store;
pub mod validation;

use thiserror::Error;

use self::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many attempts, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Account locked")]
    AccountLocked,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Refresh token revoked")]
    RevokedToken,

    #[error("Credential provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("CSRF token rejected")]
    CsrfRejected,

    #[error("Origin rejected")]
    OriginRejected,

    #[error("Insufficient permission")]
    InsufficientPermission,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::ProviderUnavailable(e.to_string())
    }
}
