//! Authentication service: sign-in, sign-out and session refresh flows.
//!
//! Credentials go to the configured `CredentialStore` first. When the store is
//! missing or failing, sign-in falls back to the demo accounts (if enabled).
//! Account-state failures (disabled, locked) never fall back.

use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use vipbar_core::auth::AuthError;
use vipbar_core::auth::demo::is_demo_subject;
use vipbar_core::auth::jwt::REFRESH_TOKEN_EXPIRY_SECS;
use vipbar_core::auth::store::{Authentication, CredentialStore, StoreError};
use vipbar_core::auth::validation::{
    contains_sql_injection, contains_xss, normalize_email, validate_credentials,
};
use vipbar_core::models::auth::{ClientContext, RefreshTokenState, TokenSubject, UserIdentity};
use vipbar_core::security::{SecurityEvent, Severity, event_types};

use crate::AppState;
use crate::middleware::auth::{AuthSource, AuthenticatedUser};
use crate::services::cookies::SessionTokens;

/// A completed sign-in. The caller turns `tokens` into cookies.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: UserIdentity,
    pub is_demo: bool,
    pub tokens: SessionTokens,
}

/// Result of a successful refresh: the updated jar and the live identity.
#[derive(Debug)]
pub struct RefreshedSession {
    pub jar: CookieJar,
    pub user: UserIdentity,
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

/// Authenticate `email`/`password` and issue a session.
///
/// Shape validation runs before the rate limiter; everything after the
/// admission check records exactly one outcome in the limiter.
pub async fn sign_in(
    state: &AppState,
    email: &str,
    password: &str,
    ctx: &ClientContext,
) -> Result<SignedIn, AuthError> {
    if let Err(rejection) = validate_credentials(email, password) {
        if rejection.injection {
            let event_type = if contains_sql_injection(email) || contains_sql_injection(password) {
                event_types::SQL_INJECTION_ATTEMPT
            } else if contains_xss(email) || contains_xss(password) {
                event_types::XSS_ATTEMPT
            } else {
                event_types::INVALID_INPUT
            };
            state.security.monitor.record(
                SecurityEvent::new(event_type, Severity::High)
                    .with_context(ctx)
                    .with_details(json!({ "field": "credentials", "reason": rejection.reason })),
            );
        } else {
            debug!(reason = rejection.reason, "sign-in payload rejected");
        }
        return Err(rejection.into());
    }

    let email = normalize_email(email);
    let ip = ctx.ip_or_unknown();
    let limiter = &state.security.login_limiter;

    let decision = limiter.check_login_attempt(&email, ip);
    if !decision.allowed {
        state.security.monitor.record(
            SecurityEvent::new(event_types::RATE_LIMIT_EXCEEDED, Severity::Medium)
                .with_context(ctx)
                .with_details(json!({
                    "scope": "login",
                    "email": email,
                    "track": decision.blocked_by.map(|t| format!("{t:?}").to_lowercase()),
                    "retryAfter": decision.retry_after_secs,
                })),
        );
        return Err(AuthError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let outcome = attempt_sign_in(state, &email, password, ctx).await;
    limiter.record_login_attempt(&email, ip, outcome.is_ok());
    outcome
}

async fn attempt_sign_in(
    state: &AppState,
    email: &str,
    password: &str,
    ctx: &ClientContext,
) -> Result<SignedIn, AuthError> {
    let (user, is_demo) = match &state.store {
        Some(store) => match store.authenticate(email, password).await {
            Ok(Authentication::Verified(user)) => {
                check_account(state, &user, ctx)?;
                (user, false)
            }
            Ok(Authentication::Rejected { user }) => {
                return Err(reject_credentials(state, store, email, user, ctx).await);
            }
            Err(e) => {
                record_fallback(state, &e, ctx);
                (demo_sign_in(state, email, password, ctx, &e.to_string())?, true)
            }
        },
        None => {
            debug!("credential store not configured; using demo accounts");
            let user = demo_sign_in(state, email, password, ctx, "provider not configured")?;
            (user, true)
        }
    };

    issue_session(state, user, is_demo, ctx).await
}

/// Disabled or locked accounts fail closed.
fn check_account(state: &AppState, user: &UserIdentity, ctx: &ClientContext) -> Result<(), AuthError> {
    if !user.is_active {
        state.security.monitor.record(
            SecurityEvent::new(event_types::INACTIVE_USER_LOGIN_ATTEMPT, Severity::High)
                .with_context(ctx)
                .with_details(json!({ "userId": user.id, "email": user.email })),
        );
        return Err(AuthError::AccountDisabled);
    }
    if user.is_locked_at(Utc::now()) {
        record_locked(state, user, ctx);
        return Err(AuthError::AccountLocked);
    }
    Ok(())
}

fn record_locked(state: &AppState, user: &UserIdentity, ctx: &ClientContext) {
    state.security.monitor.record(
        SecurityEvent::new(event_types::LOCKED_ACCOUNT_LOGIN_ATTEMPT, Severity::High)
            .with_context(ctx)
            .with_details(json!({
                "userId": user.id,
                "email": user.email,
                "lockedUntil": user.locked_until,
            })),
    );
}

async fn reject_credentials(
    state: &AppState,
    store: &Arc<dyn CredentialStore>,
    email: &str,
    user: Option<UserIdentity>,
    ctx: &ClientContext,
) -> AuthError {
    if let Some(user) = &user {
        if user.is_locked_at(Utc::now()) {
            record_locked(state, user, ctx);
            return AuthError::AccountLocked;
        }
        if let Err(e) = store.record_failed_attempt(&user.id).await {
            warn!(user_id = %user.id, error = %e, "failed to record failed sign-in attempt");
        }
    }
    state.security.monitor.record(
        SecurityEvent::new(event_types::LOGIN_FAILED, Severity::Medium)
            .with_context(ctx)
            .with_details(json!({ "email": email, "reason": "invalid_credentials" })),
    );
    AuthError::InvalidCredentials
}

fn record_fallback(state: &AppState, e: &StoreError, ctx: &ClientContext) {
    let severity = if e.is_infrastructure() {
        warn!(error = %e, "credential store unavailable; falling back to demo accounts");
        Severity::Medium
    } else {
        error!(error = %e, "credential store returned bad data; falling back to demo accounts");
        Severity::High
    };
    state.security.monitor.record(
        SecurityEvent::new(event_types::PROVIDER_FALLBACK, severity)
            .with_context(ctx)
            .with_details(json!({ "error": e.to_string() })),
    );
}

fn demo_sign_in(
    state: &AppState,
    email: &str,
    password: &str,
    ctx: &ClientContext,
    reason: &str,
) -> Result<UserIdentity, AuthError> {
    if !state.demo.is_enabled() {
        return Err(AuthError::ProviderUnavailable(reason.to_string()));
    }
    state.demo.authenticate(email, password).ok_or_else(|| {
        state.security.monitor.record(
            SecurityEvent::new(event_types::LOGIN_FAILED, Severity::Low)
                .with_context(ctx)
                .with_details(json!({ "email": email, "mode": "demo" })),
        );
        AuthError::InvalidCredentials
    })
}

/// Issue tokens and do the best-effort bookkeeping for a verified user.
async fn issue_session(
    state: &AppState,
    user: UserIdentity,
    is_demo: bool,
    ctx: &ClientContext,
) -> Result<SignedIn, AuthError> {
    let access = state.codec.issue_access_token(&TokenSubject::from(&user))?;
    let refresh = state.codec.issue_refresh_token(&user.id)?;

    if !is_demo && let Some(store) = &state.store {
        let expires_at = Utc::now() + Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS);
        match store
            .persist_refresh_token(
                &user.id,
                &refresh,
                expires_at,
                ctx.user_agent.as_deref(),
                ctx.ip.as_deref(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(user_id = %user.id, "refresh token was not persisted"),
            Err(e) => warn!(user_id = %user.id, error = %e, "failed to persist refresh token"),
        }
        if let Err(e) = store.reset_failed_attempts(&user.id).await {
            warn!(user_id = %user.id, error = %e, "failed to reset failed attempts");
        }
        if let Err(e) = store.touch_last_login(&user.id).await {
            warn!(user_id = %user.id, error = %e, "failed to update last login");
        }
    }

    let event_type = if is_demo {
        event_types::DEMO_LOGIN_SUCCESS
    } else {
        event_types::LOGIN_SUCCESS
    };
    state.security.monitor.record(
        SecurityEvent::new(event_type, Severity::Low)
            .with_context(ctx)
            .with_details(json!({ "userId": user.id, "role": user.role })),
    );
    info!(user_id = %user.id, role = %user.role, demo = is_demo, "user signed in");

    Ok(SignedIn {
        user,
        is_demo,
        tokens: SessionTokens {
            access: Some(access),
            refresh: Some(refresh),
        },
    })
}

// ---------------------------------------------------------------------------
// Sign-out
// ---------------------------------------------------------------------------

/// Clear the session cookies and revoke the refresh token when possible.
/// Always completes.
pub async fn sign_out(state: &AppState, jar: CookieJar, ctx: &ClientContext) -> CookieJar {
    let cookies = state.cookies();
    let tokens = cookies.read_tokens(&jar);
    let jar = cookies.clear_auth_cookies(jar);

    let mut user_id = None;
    if let Some(refresh) = tokens.refresh.as_deref() {
        match state.codec.verify_refresh_token(refresh, ctx) {
            Ok(claims) => {
                if !is_demo_subject(&claims.sub)
                    && let Some(store) = &state.store
                    && let Err(e) = store.revoke_refresh_token(&claims.sub, Some(refresh)).await
                {
                    warn!(user_id = %claims.sub, error = %e, "failed to revoke refresh token on sign-out");
                }
                user_id = Some(claims.sub);
            }
            Err(e) => debug!(error = %e, "sign-out with unusable refresh token"),
        }
    }
    if user_id.is_none()
        && let Some(access) = tokens.access.as_deref()
        && let Ok(claims) = state.codec.verify_access_token(access, ctx)
    {
        user_id = Some(claims.sub);
    }

    state.security.monitor.record(
        SecurityEvent::new(event_types::LOGOUT, Severity::Low)
            .with_context(ctx)
            .with_details(json!({ "userId": user_id })),
    );
    info!(user_id = ?user_id, "user signed out");
    jar
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

/// A token retired by rotation still refreshes for this long, so parallel
/// requests holding the previous cookie do not look like reuse.
pub const ROTATION_GRACE_SECS: i64 = 30;

/// A refresh token that passed every check.
struct ValidRefresh {
    user: UserIdentity,
    /// Retired by a rotation inside the grace window.
    superseded: bool,
}

/// Check a refresh token against its signature, the persisted record and
/// the live account state.
pub async fn validate_refresh(
    state: &AppState,
    refresh: &str,
    ctx: &ClientContext,
) -> Result<UserIdentity, AuthError> {
    Ok(check_refresh(state, refresh, ctx).await?.user)
}

async fn check_refresh(
    state: &AppState,
    refresh: &str,
    ctx: &ClientContext,
) -> Result<ValidRefresh, AuthError> {
    let claims = state.codec.verify_refresh_token(refresh, ctx)?;

    if is_demo_subject(&claims.sub) {
        let user = state
            .demo
            .identity_for(&claims.sub)
            .ok_or_else(|| AuthError::InvalidToken("demo session no longer valid".into()))?;
        return Ok(ValidRefresh {
            user,
            superseded: false,
        });
    }

    let store = state
        .store
        .as_ref()
        .ok_or_else(|| AuthError::ProviderUnavailable("credential store not configured".into()))?;

    let superseded = match store.refresh_token_state(&claims.sub, refresh).await? {
        RefreshTokenState::Active => false,
        RefreshTokenState::Rotated { at }
            if state.config.rotate_refresh_tokens
                && Utc::now() - at <= Duration::seconds(ROTATION_GRACE_SECS) =>
        {
            debug!(user_id = %claims.sub, "refresh token rotated moments ago; accepting");
            true
        }
        RefreshTokenState::Revoked | RefreshTokenState::Rotated { .. } => {
            if state.config.rotate_refresh_tokens {
                handle_reuse(state, store, &claims.sub, ctx).await;
            }
            return Err(AuthError::RevokedToken);
        }
        RefreshTokenState::Expired => {
            return Err(AuthError::InvalidToken("refresh token expired".into()));
        }
        RefreshTokenState::Unknown => {
            return Err(AuthError::InvalidToken("refresh token not recognised".into()));
        }
    };

    let user = store
        .find_user_by_id(&claims.sub)
        .await?
        .ok_or_else(|| AuthError::InvalidToken("unknown user".into()))?;
    if !user.is_active {
        return Err(AuthError::AccountDisabled);
    }
    if user.is_locked_at(Utc::now()) {
        return Err(AuthError::AccountLocked);
    }
    Ok(ValidRefresh { user, superseded })
}

/// A revoked token came back while rotation is on: treat the whole token
/// family as compromised.
async fn handle_reuse(
    state: &AppState,
    store: &Arc<dyn CredentialStore>,
    user_id: &str,
    ctx: &ClientContext,
) {
    if let Err(e) = store.revoke_refresh_token(user_id, None).await {
        warn!(user_id, error = %e, "failed to revoke tokens after reuse");
    }
    state.security.monitor.record(
        SecurityEvent::new(event_types::REFRESH_TOKEN_REUSE, Severity::Critical)
            .with_context(ctx)
            .with_details(json!({ "userId": user_id })),
    );
}

/// Reissue the access cookie from the refresh cookie.
pub async fn refresh_session(
    state: &AppState,
    jar: CookieJar,
    ctx: &ClientContext,
) -> Result<RefreshedSession, AuthError> {
    let cookies = state.cookies();
    let refresh = cookies
        .read_tokens(&jar)
        .refresh
        .ok_or_else(|| AuthError::InvalidToken("missing refresh token".into()))?;

    let ValidRefresh { user, superseded } = check_refresh(state, &refresh, ctx).await?;
    let access = state.codec.issue_access_token(&TokenSubject::from(&user))?;
    let mut jar = cookies.set_access_cookie(jar, &access);

    // A superseded token keeps its cookie; the request that rotated it set the successor.
    if state.config.rotate_refresh_tokens
        && !superseded
        && !is_demo_subject(&user.id)
        && let Some(store) = &state.store
    {
        let rotated = state.codec.issue_refresh_token(&user.id)?;
        let expires_at = Utc::now() + Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS);
        match store
            .persist_refresh_token(
                &user.id,
                &rotated,
                expires_at,
                ctx.user_agent.as_deref(),
                ctx.ip.as_deref(),
            )
            .await
        {
            Ok(true) => {
                if let Err(e) = store.retire_refresh_token(&user.id, &refresh).await {
                    warn!(user_id = %user.id, error = %e, "failed to revoke rotated refresh token");
                }
                jar = cookies.set_refresh_cookie(jar, &rotated);
            }
            Ok(false) => warn!(user_id = %user.id, "rotated refresh token was not persisted"),
            Err(e) => warn!(user_id = %user.id, error = %e, "failed to persist rotated refresh token"),
        }
    }

    state.security.monitor.record(
        SecurityEvent::new(event_types::TOKEN_REFRESHED, Severity::Low)
            .with_context(ctx)
            .with_details(json!({ "userId": user.id })),
    );
    debug!(user_id = %user.id, "session refreshed");
    Ok(RefreshedSession { jar, user })
}

/// The caller's identity: access-token claims when they verify, otherwise a
/// refresh with a live account lookup.
pub async fn current_identity(
    state: &AppState,
    jar: CookieJar,
    ctx: &ClientContext,
) -> Result<(CookieJar, AuthenticatedUser), AuthError> {
    let tokens = state.cookies().read_tokens(&jar);
    if let Some(access) = tokens.access.as_deref() {
        match state.codec.verify_access_token(access, ctx) {
            Ok(claims) => return Ok((jar, AuthenticatedUser::from_claims(claims))),
            Err(e) => debug!(error = %e, "access token rejected; trying refresh token"),
        }
    }
    if tokens.refresh.is_none() {
        return Err(AuthError::InvalidToken("no session".into()));
    }
    let refreshed = refresh_session(state, jar, ctx).await?;
    let user = AuthenticatedUser::from_identity(&refreshed.user, AuthSource::RefreshToken);
    Ok((refreshed.jar, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use vipbar_core::auth::permissions::{ROLE_CASHIER, default_permissions};
    use vipbar_core::auth::store::MemoryCredentialStore;

    use crate::SecurityState;
    use crate::config::ApiConfig;

    fn user(id: &str, email: &str) -> UserIdentity {
        UserIdentity {
            id: id.into(),
            email: email.into(),
            full_name: "Test User".into(),
            role: ROLE_CASHIER.into(),
            display_name: None,
            permissions: default_permissions(ROLE_CASHIER),
            is_active: true,
            locked_until: None,
            failed_login_attempts: 0,
            last_login: None,
        }
    }

    fn state_with(store: Arc<MemoryCredentialStore>, config: ApiConfig) -> AppState {
        let store: Arc<dyn CredentialStore> = store;
        AppState::new(config, Some(store), SecurityState::new())
    }

    fn ctx() -> ClientContext {
        ClientContext::new("10.0.0.1")
    }

    #[tokio::test]
    async fn sign_in_issues_tokens_and_persists_refresh() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert_user(user("u-1", "cashier@bar.com"), "correctpw").unwrap();
        let state = state_with(store.clone(), ApiConfig::development());

        let signed = sign_in(&state, " Cashier@Bar.com ", "correctpw", &ctx()).await.unwrap();
        assert!(!signed.is_demo);
        assert_eq!(signed.user.id, "u-1");
        assert!(signed.tokens.access.is_some());
        assert_eq!(store.refresh_records("u-1").len(), 1);
        assert_eq!(state.security.monitor.events_of_type(event_types::LOGIN_SUCCESS).len(), 1);
    }

    #[tokio::test]
    async fn wrong_password_is_generic_and_counted() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert_user(user("u-1", "cashier@bar.com"), "correctpw").unwrap();
        let state = state_with(store, ApiConfig::development());

        let err = sign_in(&state, "cashier@bar.com", "wrongpass", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let record = state.security.login_limiter.email_record("cashier@bar.com").unwrap();
        assert_eq!(record.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn invalid_shape_skips_limiter() {
        let state = state_with(Arc::new(MemoryCredentialStore::new()), ApiConfig::development());
        let err = sign_in(&state, "not-an-email", "correctpw", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert!(state.security.login_limiter.ip_record("10.0.0.1").is_none());
    }

    #[tokio::test]
    async fn injection_is_recorded() {
        let state = state_with(Arc::new(MemoryCredentialStore::new()), ApiConfig::development());
        let err = sign_in(&state, "a@bar.com", "' OR '1'='1", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        let events = state.security.monitor.events_of_type(event_types::SQL_INJECTION_ATTEMPT);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn fourth_attempt_on_same_email_is_rate_limited() {
        let state = state_with(Arc::new(MemoryCredentialStore::new()), ApiConfig::development());
        for _ in 0..3 {
            let err = sign_in(&state, "who@bar.com", "wrongpass", &ctx()).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = sign_in(&state, "who@bar.com", "wrongpass", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited { retry_after_secs } if retry_after_secs > 0));
    }

    #[tokio::test]
    async fn locked_account_does_not_fall_back() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut locked = user("u-2", "admin@barvip.com");
        locked.locked_until = Some(Utc::now() + Duration::minutes(10));
        store.insert_user(locked, "demo1234").unwrap();
        let state = state_with(store, ApiConfig::development());

        let err = sign_in(&state, "admin@barvip.com", "demo1234", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
        let events = state.security.monitor.events_of_type(event_types::LOCKED_ACCOUNT_LOGIN_ATTEMPT);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn unconfigured_store_uses_demo_accounts() {
        let state = AppState::new(ApiConfig::development(), None, SecurityState::new());
        let signed = sign_in(&state, "manager@barvip.com", "demo1234", &ctx()).await.unwrap();
        assert!(signed.is_demo);
        assert_eq!(signed.user.id, "demo-manager");
    }

    #[tokio::test]
    async fn provider_failure_without_demo_is_unavailable() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set_unavailable(true);
        let mut config = ApiConfig::development();
        config.demo_password = None;
        let state = state_with(store, config);

        let err = sign_in(&state, "admin@barvip.com", "demo1234", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderUnavailable(_)));
        assert_eq!(state.security.monitor.events_of_type(event_types::PROVIDER_FALLBACK).len(), 1);
    }

    #[tokio::test]
    async fn sign_out_revokes_refresh_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert_user(user("u-1", "cashier@bar.com"), "correctpw").unwrap();
        let state = state_with(store.clone(), ApiConfig::development());
        let signed = sign_in(&state, "cashier@bar.com", "correctpw", &ctx()).await.unwrap();

        let jar = state.cookies().set_auth_cookies(
            CookieJar::new(),
            signed.tokens.access.as_deref().unwrap(),
            signed.tokens.refresh.as_deref().unwrap(),
        );
        let jar = sign_out(&state, jar, &ctx()).await;

        assert!(state.cookies().read_tokens(&jar).is_empty());
        assert!(store.refresh_records("u-1").iter().all(|r| r.is_revoked));
        assert_eq!(state.security.monitor.events_of_type(event_types::LOGOUT).len(), 1);
    }

    #[tokio::test]
    async fn sign_out_without_cookies_completes() {
        let state = AppState::new(ApiConfig::development(), None, SecurityState::new());
        let jar = sign_out(&state, CookieJar::new(), &ctx()).await;
        assert!(state.cookies().read_tokens(&jar).is_empty());
    }

    #[tokio::test]
    async fn refresh_rejects_disabled_account() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert_user(user("u-1", "cashier@bar.com"), "correctpw").unwrap();
        let state = state_with(store.clone(), ApiConfig::development());
        let signed = sign_in(&state, "cashier@bar.com", "correctpw", &ctx()).await.unwrap();

        let mut disabled = user("u-1", "cashier@bar.com");
        disabled.is_active = false;
        store.update_user(disabled);

        let refresh = signed.tokens.refresh.unwrap();
        let err = validate_refresh(&state, &refresh, &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));
    }

    fn rotating_state(store: Arc<MemoryCredentialStore>) -> AppState {
        let mut config = ApiConfig::development();
        config.rotate_refresh_tokens = true;
        state_with(store, config)
    }

    #[tokio::test]
    async fn parallel_refresh_inside_grace_is_not_reuse() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert_user(user("u-1", "cashier@bar.com"), "correctpw").unwrap();
        let state = rotating_state(store.clone());
        let signed = sign_in(&state, "cashier@bar.com", "correctpw", &ctx()).await.unwrap();
        let original = signed.tokens.refresh.unwrap();
        let cookies = state.cookies();

        let presented = || cookies.set_refresh_cookie(CookieJar::new(), &original);

        let first = refresh_session(&state, presented(), &ctx()).await.unwrap();
        let rotated = cookies.read_tokens(&first.jar).refresh.unwrap();
        assert_ne!(rotated, original);

        // Second request raced the first with the same cookie.
        let second = refresh_session(&state, presented(), &ctx()).await.unwrap();
        assert_eq!(second.user.id, "u-1");
        assert!(cookies.read_tokens(&second.jar).access.is_some());
        assert_eq!(cookies.read_tokens(&second.jar).refresh.as_deref(), Some(original.as_str()));

        let reuse = state.security.monitor.events_of_type(event_types::REFRESH_TOKEN_REUSE);
        assert!(reuse.is_empty());
        assert!(store.is_refresh_token_valid("u-1", &rotated).await.unwrap());
        assert_eq!(store.refresh_records("u-1").len(), 2);
    }

    #[tokio::test]
    async fn revoked_token_under_rotation_flags_reuse() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert_user(user("u-1", "cashier@bar.com"), "correctpw").unwrap();
        let state = rotating_state(store.clone());
        let signed = sign_in(&state, "cashier@bar.com", "correctpw", &ctx()).await.unwrap();
        let original = signed.tokens.refresh.unwrap();
        let jar = state.cookies().set_refresh_cookie(CookieJar::new(), &original);
        let refreshed = refresh_session(&state, jar, &ctx()).await.unwrap();
        let rotated = state.cookies().read_tokens(&refreshed.jar).refresh.unwrap();

        // Signed out on another device: the rotated token is plainly revoked.
        store.revoke_refresh_token("u-1", Some(&rotated)).await.unwrap();
        let err = validate_refresh(&state, &rotated, &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::RevokedToken));
        let reuse = state.security.monitor.events_of_type(event_types::REFRESH_TOKEN_REUSE);
        assert_eq!(reuse[0].severity, Severity::Critical);

        // The family is gone, including the grace of the retired original.
        let err = validate_refresh(&state, &original, &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::RevokedToken));
        let records = store.refresh_records("u-1");
        assert!(records.iter().all(|r| r.is_revoked && r.rotated_at.is_none()));
    }

    #[tokio::test]
    async fn current_identity_prefers_access_claims() {
        let state = AppState::new(ApiConfig::development(), None, SecurityState::new());
        let demo = state.demo.identity_for("demo-cashier").unwrap();
        let access = state.codec.issue_access_token(&TokenSubject::from(&demo)).unwrap();
        let jar = state.cookies().set_access_cookie(CookieJar::new(), &access);

        let (_, who) = current_identity(&state, jar, &ctx()).await.unwrap();
        assert_eq!(who.user_id, "demo-cashier");
        assert_eq!(who.source, AuthSource::AccessToken);
        assert!(who.is_demo);
        assert_ne!(who.permissions, BTreeMap::new());
    }
}
