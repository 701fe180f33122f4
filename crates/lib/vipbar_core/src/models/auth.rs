//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API response models
//! in `vipbar_api::models`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission name → granted flag, as stored on the user profile and
/// embedded in access tokens.
pub type PermissionMap = BTreeMap<String, bool>;

/// User record as returned by the credential store.
///
/// The core treats this as read-mostly: it only ever asks the store to update
/// `last_login`, `failed_login_attempts` and `locked_until`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub display_name: Option<String>,
    pub permissions: PermissionMap,
    pub is_active: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserIdentity {
    /// Whether the account is locked at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// Caller information attached to security events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub path: Option<String>,
}

impl ClientContext {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    /// IP used as a rate-limit key; requests without one share a bucket.
    pub fn ip_or_unknown(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

/// The identity fields an access token is issued for.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSubject {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub permissions: PermissionMap,
}

impl From<&UserIdentity> for TokenSubject {
    fn from(user: &UserIdentity) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
        }
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user ID.
    pub sub: String,
    pub email: String,
    pub role: String,
    pub permissions: PermissionMap,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    pub jti: String,
    pub iss: String,
    pub aud: String,
}

/// JWT claims embedded in refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    /// Always `"refresh"`.
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Refresh token record stored by the credential store.
///
/// Keyed by the SHA-256 hash of the raw token; the raw token is never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Set when the token was retired by rotation rather than revoked.
    pub rotated_at: Option<DateTime<Utc>>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-side state of a presented refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenState {
    Active,
    Revoked,
    /// Replaced by a rotated successor at `at`.
    Rotated { at: DateTime<Utc> },
    Expired,
    /// No record for this hash (or it belongs to another user).
    Unknown,
}
