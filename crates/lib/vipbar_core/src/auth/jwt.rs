//! JWT token issuance and verification.
//!
//! Access tokens are stateless HS256 JWTs carrying the user's role and
//! permission map; they are never looked up in storage. Refresh tokens are
//! HS256 JWTs with `type = "refresh"` whose validity additionally depends on
//! a revocable record held by the credential store (see [`super::store`]).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::AuthError;
use crate::models::auth::{AccessClaims, ClientContext, RefreshClaims, TokenSubject};
use crate::security::{SecurityEvent, SecurityMonitor, Severity, event_types};
use crate::uuid::token_id;

/// Fixed `iss` claim.
pub const TOKEN_ISSUER: &str = "vip-bar-management";
/// Fixed `aud` claim.
pub const TOKEN_AUDIENCE: &str = "vip-bar-users";

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 15 * 60;
/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;
/// Hard ceiling on access token age, independent of `exp`.
pub const MAX_ACCESS_TOKEN_AGE_SECS: i64 = 24 * 60 * 60;

/// Value of the `type` claim on refresh tokens.
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Minimum signing key length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Allowed drift for `iat` values slightly ahead of the local clock.
const CLOCK_SKEW_SECS: i64 = 60;

/// Development-only signing key, used outside production when no usable
/// secret is configured.
const DEV_SECRET: &str = "vipbar-development-only-signing-secret-not-for-production";

/// Well-known placeholder values that must never sign production tokens.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "secret",
    "changeme",
    "change-me",
    "change_me",
    "your-secret-key",
    "your-jwt-secret",
    "your-super-secret-jwt-token-with-at-least-32-characters-long",
    "jwt-secret",
    "supersecret",
    DEV_SECRET,
];

// ---------------------------------------------------------------------------
// Signing secret
// ---------------------------------------------------------------------------

/// HMAC signing key that passed the start-up strength checks.
#[derive(Clone)]
pub struct SigningSecret(String);

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(***)")
    }
}

impl SigningSecret {
    /// Validate a configured secret.
    ///
    /// In production an empty, short or placeholder secret is a start-up
    /// error. Outside production it is replaced by the development secret
    /// with a warning.
    pub fn new(secret: impl Into<String>, production: bool) -> Result<Self, AuthError> {
        let secret = secret.into();
        match weakness(&secret) {
            None => Ok(Self(secret)),
            Some(reason) if production => Err(AuthError::Internal(format!(
                "refusing to start: signing secret is {reason}"
            ))),
            Some(reason) => {
                warn!(
                    reason,
                    "signing secret rejected; falling back to the DEVELOPMENT-ONLY secret"
                );
                Ok(Self::development())
            }
        }
    }

    /// The fixed development-only secret.
    pub fn development() -> Self {
        Self(DEV_SECRET.to_string())
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Describe why a secret is unusable, if it is.
fn weakness(secret: &str) -> Option<&'static str> {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return Some("empty");
    }
    let lowered = trimmed.to_ascii_lowercase();
    if PLACEHOLDER_SECRETS.iter().any(|p| lowered == *p) || lowered.contains("changeme") {
        return Some("a well-known placeholder");
    }
    if trimmed.len() < MIN_SECRET_LEN {
        return Some("shorter than 32 bytes");
    }
    let mut chars = trimmed.chars();
    if let Some(first) = chars.next()
        && chars.all(|c| c == first)
    {
        return Some("a repeated single character");
    }
    None
}

/// Resolve the signing secret: env var `JWT_SECRET` → `AUTH_SECRET` → the
/// development secret (outside production only).
pub fn resolve_jwt_secret(production: bool) -> Result<SigningSecret, AuthError> {
    for var in ["JWT_SECRET", "AUTH_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return SigningSecret::new(secret, production);
        }
    }
    if production {
        return Err(AuthError::Internal(
            "refusing to start: JWT_SECRET is not set".into(),
        ));
    }
    warn!("JWT_SECRET not set; using the DEVELOPMENT-ONLY signing secret");
    Ok(SigningSecret::development())
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Claims with the timestamps checked after signature verification.
trait Timestamps {
    fn iat(&self) -> i64;
    fn exp(&self) -> i64;
}

impl Timestamps for AccessClaims {
    fn iat(&self) -> i64 {
        self.iat
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Timestamps for RefreshClaims {
    fn iat(&self) -> i64 {
        self.iat
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Creates and verifies signed, time-bound access and refresh tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl TokenCodec {
    pub fn new(secret: &SigningSecret) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            monitor: None,
        }
    }

    /// Report signature failures to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Issue a 15-minute access token for `subject`.
    pub fn issue_access_token(&self, subject: &TokenSubject) -> Result<String, AuthError> {
        self.issue_access_token_at(subject, Utc::now())
    }

    /// Issue an access token as if the current time were `now`.
    pub fn issue_access_token_at(
        &self,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = AccessClaims {
            sub: subject.user_id.clone(),
            email: subject.email.clone(),
            role: subject.role.clone(),
            permissions: subject.permissions.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS)).timestamp(),
            jti: token_id(),
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
        };
        self.sign(&claims)
    }

    /// Issue a 7-day refresh token for `user_id`.
    pub fn issue_refresh_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.issue_refresh_token_at(user_id, Utc::now())
    }

    /// Issue a refresh token as if the current time were `now`.
    pub fn issue_refresh_token_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: token_id(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS)).timestamp(),
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
        };
        self.sign(&claims)
    }

    /// Verify an access token, returning its claims.
    pub fn verify_access_token(
        &self,
        token: &str,
        ctx: &ClientContext,
    ) -> Result<AccessClaims, AuthError> {
        self.decode_claims(
            token,
            ACCESS_TOKEN_EXPIRY_SECS,
            MAX_ACCESS_TOKEN_AGE_SECS,
            "access",
            ctx,
        )
    }

    /// Verify a refresh token's signature and claims. The caller still has to
    /// check the persisted record.
    pub fn verify_refresh_token(
        &self,
        token: &str,
        ctx: &ClientContext,
    ) -> Result<RefreshClaims, AuthError> {
        let claims: RefreshClaims = self.decode_claims(
            token,
            REFRESH_TOKEN_EXPIRY_SECS,
            REFRESH_TOKEN_EXPIRY_SECS,
            "refresh",
            ctx,
        )?;
        if claims.token_type != REFRESH_TOKEN_TYPE {
            return Err(AuthError::InvalidToken("not a refresh token".into()));
        }
        Ok(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
    }

    fn decode_claims<T: DeserializeOwned + Timestamps>(
        &self,
        token: &str,
        lifetime_secs: i64,
        max_age_secs: i64,
        kind: &'static str,
        ctx: &ClientContext,
    ) -> Result<T, AuthError> {
        if !is_well_formed(token) {
            return Err(AuthError::InvalidToken("malformed token".into()));
        }

        let claims = decode::<T>(token, &self.decoding, &validation())
            .map_err(|e| self.reject(e.kind(), kind, ctx))?
            .claims;

        let now = Utc::now().timestamp();
        if claims.exp() - claims.iat() != lifetime_secs {
            return Err(AuthError::InvalidToken("unexpected token lifetime".into()));
        }
        if claims.iat() > now + CLOCK_SKEW_SECS {
            return Err(AuthError::InvalidToken("token issued in the future".into()));
        }
        if now - claims.iat() > max_age_secs {
            return Err(AuthError::InvalidToken("token too old".into()));
        }
        Ok(claims)
    }

    /// Map a decode failure; bad signatures are reported as possible
    /// tampering, everything else is ordinary.
    fn reject(&self, kind: &ErrorKind, token_kind: &'static str, ctx: &ClientContext) -> AuthError {
        let reason = match kind {
            ErrorKind::InvalidSignature => {
                if let Some(monitor) = &self.monitor {
                    monitor.record(
                        SecurityEvent::new(event_types::TOKEN_SIGNATURE_INVALID, Severity::High)
                            .with_context(ctx)
                            .with_details(serde_json::json!({ "tokenKind": token_kind })),
                    );
                }
                "signature invalid"
            }
            ErrorKind::ExpiredSignature => "token expired",
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => "issuer or audience mismatch",
            ErrorKind::MissingRequiredClaim(_) | ErrorKind::Json(_) => "missing or malformed claims",
            _ => "malformed token",
        };
        debug!(token_kind, reason, "token verification failed");
        AuthError::InvalidToken(reason.into())
    }
}

/// Three non-empty dot-separated segments.
fn is_well_formed(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3 && segments.iter().all(|s| !s.is_empty())
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.set_audience(&[TOKEN_AUDIENCE]);
    validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
    validation
}
