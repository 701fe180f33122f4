//! PostgreSQL credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::password::{verify_password, verify_unknown_account};
use super::permissions::default_permissions;
use super::store::{
    ACCOUNT_LOCK_MINUTES, Authentication, CredentialStore, MAX_FAILED_LOGIN_ATTEMPTS, StoreError,
    hash_token,
};
use crate::models::auth::{PermissionMap, RefreshTokenState, UserIdentity};
use crate::uuid::uuidv7;

const USER_COLUMNS: &str = "id::text, email, full_name, display_name, role, permissions, \
     is_active, locked_until, failed_login_attempts, last_login, password_hash";

type UserRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    Option<Json<PermissionMap>>,
    bool,
    Option<DateTime<Utc>>,
    i32,
    Option<DateTime<Utc>>,
    String,
);

fn split_row(row: UserRow) -> (UserIdentity, String) {
    let (
        id,
        email,
        full_name,
        display_name,
        role,
        permissions,
        is_active,
        locked_until,
        failed_login_attempts,
        last_login,
        password_hash,
    ) = row;
    let permissions = permissions
        .map(|Json(p)| p)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| default_permissions(&role));
    (
        UserIdentity {
            id,
            email,
            full_name,
            role,
            display_name,
            permissions,
            is_active,
            locked_until,
            failed_login_attempts,
            last_login,
        },
        password_hash,
    )
}

/// Non-UUID ids (demo subjects) can never match a row.
fn parse_id(user_id: &str) -> Option<Uuid> {
    Uuid::parse_str(user_id).ok()
}

/// [`CredentialStore`] backed by the `users` and `refresh_tokens` tables.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by_email(&self, email: &str) -> Result<Option<(UserIdentity, String)>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(split_row))
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Authentication, StoreError> {
        let Some((identity, password_hash)) = self.fetch_by_email(email).await? else {
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
        Ok(self.fetch_by_email(email).await?.map(|(identity, _)| identity))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserIdentity>, StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| split_row(r).0))
    }

    async fn refresh_token_state(
        &self,
        user_id: &str,
        raw: &str,
    ) -> Result<RefreshTokenState, StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(RefreshTokenState::Unknown);
        };
        let row = sqlx::query_as::<_, (bool, bool, Option<DateTime<Utc>>)>(
            "SELECT is_revoked, expires_at > now(), rotated_at FROM refresh_tokens \
             WHERE token_hash = $1 AND user_id = $2",
        )
        .bind(hash_token(raw))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            None => RefreshTokenState::Unknown,
            Some((true, _, Some(at))) => RefreshTokenState::Rotated { at },
            Some((true, _, None)) => RefreshTokenState::Revoked,
            Some((false, false, _)) => RefreshTokenState::Expired,
            Some((false, true, _)) => RefreshTokenState::Active,
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
        let Some(id) = parse_id(user_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, device_info, ip_address) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuidv7())
        .bind(id)
        .bind(hash_token(raw))
        .bind(expires_at)
        .bind(device_info)
        .bind(ip_address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_token(
        &self,
        user_id: &str,
        raw: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(false);
        };
        let result = match raw {
            Some(raw) => {
                sqlx::query(
                    "UPDATE refresh_tokens SET is_revoked = true, revoked_at = now() \
                     WHERE user_id = $1 AND token_hash = $2 AND NOT is_revoked",
                )
                .bind(id)
                .bind(hash_token(raw))
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE refresh_tokens \
                     SET is_revoked = true, revoked_at = COALESCE(revoked_at, now()), rotated_at = NULL \
                     WHERE user_id = $1 AND (NOT is_revoked OR rotated_at IS NOT NULL)",
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn retire_refresh_token(&self, user_id: &str, raw: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true, revoked_at = now(), rotated_at = now() \
             WHERE user_id = $1 AND token_hash = $2 AND NOT is_revoked",
        )
        .bind(id)
        .bind(hash_token(raw))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_last_login(&self, user_id: &str) -> Result<(), StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(());
        };
        sqlx::query("UPDATE users SET last_login = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_failed_attempts(&self, user_id: &str) -> Result<(), StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failed_attempt(&self, user_id: &str) -> Result<(), StoreError> {
        let Some(id) = parse_id(user_id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE users SET \
               failed_login_attempts = failed_login_attempts + 1, \
               locked_until = CASE WHEN failed_login_attempts + 1 >= $2 \
                 THEN now() + make_interval(mins => $3) ELSE locked_until END, \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(MAX_FAILED_LOGIN_ATTEMPTS)
        .bind(ACCOUNT_LOCK_MINUTES as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bootstrap helpers
// ---------------------------------------------------------------------------

/// Check whether any admin user exists.
pub async fn admin_exists(pool: &PgPool) -> Result<bool, StoreError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE role = 'admin')",
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Create a user with the role's default permissions, returning the user ID.
pub async fn create_user(
    pool: &PgPool,
    email: &str,
    full_name: &str,
    role: &str,
    password_hash: &str,
) -> Result<String, StoreError> {
    let user_id = sqlx::query_scalar::<_, String>(
        "INSERT INTO users (id, email, full_name, role, permissions, password_hash) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id::text",
    )
    .bind(uuidv7())
    .bind(email.trim().to_lowercase())
    .bind(full_name)
    .bind(role)
    .bind(Json(default_permissions(role)))
    .bind(password_hash)
    .fetch_one(pool)
    .await?;
    Ok(user_id)
}

/// Delete refresh token rows that expired more than a day ago.
pub async fn purge_expired_refresh_tokens(pool: &PgPool) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM refresh_tokens WHERE expires_at < now() - interval '1 day'",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
