//! Credential store interface and the in-memory implementation.
//!
//! The store is the only collaborator that knows about user records and
//! persisted refresh tokens. The PostgreSQL implementation lives in
//! [`super::queries`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::AuthError;
use super::password::{hash_password, verify_password, verify_unknown_account};
use crate::models::auth::{RefreshTokenRecord, RefreshTokenState, UserIdentity};
use crate::uuid::uuidv7;

/// Failed password checks before the account is locked.
pub const MAX_FAILED_LOGIN_ATTEMPTS: i32 = 5;
/// How long an account stays locked.
pub const ACCOUNT_LOCK_MINUTES: i64 = 30;

/// Credential store failures.
///
/// `Unavailable` and `RateLimited` are infrastructure problems;
/// `IncompleteProfile` and `Data` mean the store answered but the record was
/// unusable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("credential store rate limited")]
    RateLimited,

    #[error("incomplete user profile: {0}")]
    IncompleteProfile(String),

    #[error("credential store data error: {0}")]
    Data(String),
}

impl StoreError {
    /// Whether this is an infrastructure failure rather than bad data.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::RateLimited)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) => match db.code().as_deref() {
                // too_many_connections / cannot_connect_now
                Some("53300") | Some("57P03") => StoreError::RateLimited,
                _ => StoreError::Data(e.to_string()),
            },
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Data(e.to_string()),
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

/// Outcome of a password check.
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// Password matched; the caller still has to check the account state.
    Verified(UserIdentity),
    /// Unknown email or wrong password. Carries the record when one exists so
    /// the caller can update failure counters.
    Rejected { user: Option<UserIdentity> },
}

/// SHA-256 hex digest of a raw refresh token. Only this is ever stored.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity provider and refresh-token table.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Check `password` for `email`.
    async fn authenticate(&self, email: &str, password: &str)
    -> Result<Authentication, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserIdentity>, StoreError>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserIdentity>, StoreError>;

    /// Active users only.
    async fn find_active_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self
            .find_user_by_email(email)
            .await?
            .filter(|u| u.is_active))
    }

    /// State of the persisted record for `raw`, if it belongs to `user_id`.
    async fn refresh_token_state(
        &self,
        user_id: &str,
        raw: &str,
    ) -> Result<RefreshTokenState, StoreError>;

    /// A refresh token is valid only while its record is present, not
    /// revoked and not expired.
    async fn is_refresh_token_valid(&self, user_id: &str, raw: &str) -> Result<bool, StoreError> {
        Ok(self.refresh_token_state(user_id, raw).await? == RefreshTokenState::Active)
    }

    async fn persist_refresh_token(
        &self,
        user_id: &str,
        raw: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Revoke one token, or every token of the user when `raw` is `None`.
    /// Revoking everything also ends the grace of recently rotated tokens.
    /// Returns whether anything was revoked.
    async fn revoke_refresh_token(&self, user_id: &str, raw: Option<&str>)
    -> Result<bool, StoreError>;

    /// Revoke `raw` because a successor replaced it. Reported afterwards as
    /// [`RefreshTokenState::Rotated`].
    async fn retire_refresh_token(&self, user_id: &str, raw: &str) -> Result<bool, StoreError>;

    async fn touch_last_login(&self, user_id: &str) -> Result<(), StoreError>;

    async fn reset_failed_attempts(&self, user_id: &str) -> Result<(), StoreError>;

    /// Count a failed password check; locks the account after
    /// [`MAX_FAILED_LOGIN_ATTEMPTS`].
    async fn record_failed_attempt(&self, user_id: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct StoredUser {
    identity: UserIdentity,
    password_hash: String,
}

/// Single-process credential store for tests and local development.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: DashMap<String, StoredUser>,
    tokens: DashMap<String, RefreshTokenRecord>,
    unavailable: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user with a plaintext password (hashed with bcrypt).
    pub fn insert_user(&self, identity: UserIdentity, password: &str) -> Result<(), AuthError> {
        let password_hash = hash_password(password)?;
        self.users.insert(
            identity.id.clone(),
            StoredUser {
                identity,
                password_hash,
            },
        );
        Ok(())
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Replace a user's record, keeping the password.
    pub fn update_user(&self, identity: UserIdentity) {
        if let Some(mut stored) = self.users.get_mut(&identity.id) {
            stored.identity = identity;
        }
    }

    /// Persisted refresh records for `user_id`.
    pub fn refresh_records(&self, user_id: &str) -> Vec<RefreshTokenRecord> {
        self.tokens
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn lookup_email(&self, email: &str) -> Option<(UserIdentity, String)> {
        let email = email.trim().to_lowercase();
        self.users
            .iter()
            .find(|u| u.identity.email.to_lowercase() == email)
            .map(|u| (u.identity.clone(), u.password_hash.clone()))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Authentication, StoreError> {
        self.check_available()?;
        let Some((identity, password_hash)) = self.lookup_email(email) else {
            verify_unknown_account(password);
            return Ok(Authentication::Rejected { user: None });
        };
        if identity.role.trim().is_empty() {
            return Err(StoreError::IncompleteProfile(format!(
                "user {} has no role",
                identity.id
            )));
        }
        if verify_password(password, &password_hash) {
            Ok(Authentication::Verified(identity))
        } else {
            Ok(Authentication::Rejected {
                user: Some(identity),
            })
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserIdentity>, StoreError> {
        self.check_available()?;
        Ok(self.lookup_email(email).map(|(identity, _)| identity))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserIdentity>, StoreError> {
        self.check_available()?;
        Ok(self.users.get(user_id).map(|u| u.identity.clone()))
    }

    async fn refresh_token_state(
        &self,
        user_id: &str,
        raw: &str,
    ) -> Result<RefreshTokenState, StoreError> {
        self.check_available()?;
        let Some(record) = self.tokens.get(&hash_token(raw)) else {
            return Ok(RefreshTokenState::Unknown);
        };
        Ok(if record.user_id != user_id {
            RefreshTokenState::Unknown
        } else if record.is_revoked {
            match record.rotated_at {
                Some(at) => RefreshTokenState::Rotated { at },
                None => RefreshTokenState::Revoked,
            }
        } else if record.expires_at <= Utc::now() {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Active
        })
    }

    async fn persist_refresh_token(
        &self,
        user_id: &str,
        raw: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let token_hash = hash_token(raw);
        let record = RefreshTokenRecord {
            id: uuidv7().to_string(),
            user_id: user_id.to_string(),
            token_hash: token_hash.clone(),
            expires_at,
            is_revoked: false,
            revoked_at: None,
            rotated_at: None,
            device_info: device_info.map(str::to_string),
            ip_address: ip_address.map(str::to_string),
            created_at: Utc::now(),
        };
        self.tokens.insert(token_hash, record);
        Ok(true)
    }

    async fn revoke_refresh_token(
        &self,
        user_id: &str,
        raw: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        let mut revoked = false;
        match raw {
            Some(raw) => {
                if let Some(mut record) = self.tokens.get_mut(&hash_token(raw))
                    && record.user_id == user_id
                    && !record.is_revoked
                {
                    record.is_revoked = true;
                    record.revoked_at = Some(now);
                    revoked = true;
                }
            }
            None => {
                for mut record in self.tokens.iter_mut() {
                    if record.user_id != user_id {
                        continue;
                    }
                    if !record.is_revoked {
                        record.is_revoked = true;
                        record.revoked_at = Some(now);
                        revoked = true;
                    }
                    if record.rotated_at.take().is_some() {
                        revoked = true;
                    }
                }
            }
        }
        Ok(revoked)
    }

    async fn retire_refresh_token(&self, user_id: &str, raw: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(match self.tokens.get_mut(&hash_token(raw)) {
            Some(mut record) if record.user_id == user_id && !record.is_revoked => {
                record.is_revoked = true;
                record.revoked_at = Some(now);
                record.rotated_at = Some(now);
                true
            }
            _ => false,
        })
    }

    async fn touch_last_login(&self, user_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut stored) = self.users.get_mut(user_id) {
            stored.identity.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn reset_failed_attempts(&self, user_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut stored) = self.users.get_mut(user_id) {
            stored.identity.failed_login_attempts = 0;
            stored.identity.locked_until = None;
        }
        Ok(())
    }

    async fn record_failed_attempt(&self, user_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut stored) = self.users.get_mut(user_id) {
            let identity = &mut stored.identity;
            identity.failed_login_attempts += 1;
            if identity.failed_login_attempts >= MAX_FAILED_LOGIN_ATTEMPTS {
                identity.locked_until = Some(Utc::now() + Duration::minutes(ACCOUNT_LOCK_MINUTES));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permissions::default_permissions;

    fn user(id: &str, email: &str) -> UserIdentity {
        UserIdentity {
            id: id.into(),
            email: email.into(),
            full_name: "Test User".into(),
            role: "cashier".into(),
            display_name: None,
            permissions: default_permissions("cashier"),
            is_active: true,
            locked_until: None,
            failed_login_attempts: 0,
            last_login: None,
        }
    }

    fn store_with_user() -> MemoryCredentialStore {
        let store = MemoryCredentialStore::new();
        store
            .insert_user(user("u1", "user@bar.com"), "correctpw")
            .unwrap();
        store
    }

    #[test]
    fn token_hash_is_sha256_hex() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn authenticate_matches_password() {
        let store = store_with_user();
        assert!(matches!(
            store.authenticate("USER@bar.com", "correctpw").await.unwrap(),
            Authentication::Verified(u) if u.id == "u1"
        ));
        assert!(matches!(
            store.authenticate("user@bar.com", "wrongpw").await.unwrap(),
            Authentication::Rejected { user: Some(_) }
        ));
        assert!(matches!(
            store.authenticate("nobody@bar.com", "correctpw").await.unwrap(),
            Authentication::Rejected { user: None }
        ));
    }

    #[tokio::test]
    async fn unknown_email_costs_a_password_check() {
        let store = store_with_user();
        // Warm the lazily built hash so it is not part of the measurement.
        verify_unknown_account("warm-up");

        let started = std::time::Instant::now();
        store.authenticate("user@bar.com", "wrongpw").await.unwrap();
        let known = started.elapsed();

        let started = std::time::Instant::now();
        store.authenticate("nobody@bar.com", "wrongpw").await.unwrap();
        let unknown = started.elapsed();

        assert!(unknown * 4 >= known, "unknown={unknown:?} known={known:?}");
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = store_with_user();
        store.set_unavailable(true);
        let err = store.authenticate("user@bar.com", "correctpw").await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn revoked_record_is_invalid() {
        let store = store_with_user();
        let expires = Utc::now() + Duration::days(7);
        store
            .persist_refresh_token("u1", "raw-token", expires, None, Some("1.2.3.4"))
            .await
            .unwrap();
        assert!(store.is_refresh_token_valid("u1", "raw-token").await.unwrap());

        assert!(store.revoke_refresh_token("u1", Some("raw-token")).await.unwrap());
        assert!(!store.is_refresh_token_valid("u1", "raw-token").await.unwrap());
        assert_eq!(
            store.refresh_token_state("u1", "raw-token").await.unwrap(),
            RefreshTokenState::Revoked
        );
        // Raw token is never stored.
        assert!(store.refresh_records("u1").iter().all(|r| r.token_hash != "raw-token"));
    }

    #[tokio::test]
    async fn expired_or_foreign_records_are_invalid() {
        let store = store_with_user();
        store
            .persist_refresh_token("u1", "old", Utc::now() - Duration::seconds(1), None, None)
            .await
            .unwrap();
        assert_eq!(
            store.refresh_token_state("u1", "old").await.unwrap(),
            RefreshTokenState::Expired
        );
        assert_eq!(
            store.refresh_token_state("someone-else", "old").await.unwrap(),
            RefreshTokenState::Unknown
        );
        assert_eq!(
            store.refresh_token_state("u1", "never-issued").await.unwrap(),
            RefreshTokenState::Unknown
        );
    }

    #[tokio::test]
    async fn retired_tokens_report_rotation_until_revoke_all() {
        let store = store_with_user();
        let expires = Utc::now() + Duration::days(7);
        store
            .persist_refresh_token("u1", "old", expires, None, None)
            .await
            .unwrap();
        assert!(store.retire_refresh_token("u1", "old").await.unwrap());
        assert!(!store.retire_refresh_token("u1", "old").await.unwrap());
        assert!(matches!(
            store.refresh_token_state("u1", "old").await.unwrap(),
            RefreshTokenState::Rotated { .. }
        ));
        assert!(!store.is_refresh_token_valid("u1", "old").await.unwrap());

        assert!(store.revoke_refresh_token("u1", None).await.unwrap());
        assert_eq!(
            store.refresh_token_state("u1", "old").await.unwrap(),
            RefreshTokenState::Revoked
        );
    }

    #[tokio::test]
    async fn revoke_all() {
        let store = store_with_user();
        let expires = Utc::now() + Duration::days(7);
        for raw in ["a", "b", "c"] {
            store
                .persist_refresh_token("u1", raw, expires, None, None)
                .await
                .unwrap();
        }
        assert!(store.revoke_refresh_token("u1", None).await.unwrap());
        assert!(store.refresh_records("u1").iter().all(|r| r.is_revoked));
        assert!(!store.revoke_refresh_token("u1", None).await.unwrap());
    }

    #[tokio::test]
    async fn failed_attempts_lock_then_reset() {
        let store = store_with_user();
        for _ in 0..MAX_FAILED_LOGIN_ATTEMPTS {
            store.record_failed_attempt("u1").await.unwrap();
        }
        let u = store.find_user_by_id("u1").await.unwrap().unwrap();
        assert!(u.is_locked_at(Utc::now()));

        store.reset_failed_attempts("u1").await.unwrap();
        let u = store.find_user_by_id("u1").await.unwrap().unwrap();
        assert_eq!(u.failed_login_attempts, 0);
        assert!(!u.is_locked_at(Utc::now()));
    }

    #[tokio::test]
    async fn active_lookup_skips_disabled_users() {
        let store = store_with_user();
        let mut u = user("u1", "user@bar.com");
        u.is_active = false;
        store.update_user(u);
        assert!(store.find_user_by_email("user@bar.com").await.unwrap().is_some());
        assert!(
            store
                .find_active_user_by_email("user@bar.com")
                .await
                .unwrap()
                .is_none()
        );
    }
}
