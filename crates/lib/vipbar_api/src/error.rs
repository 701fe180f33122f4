//! Application error types.
//!
//! Bodies are short plain-text messages. Internal detail goes to the log,
//! never to the client.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};
use vipbar_core::auth::AuthError;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Too many requests, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.as_str()),
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.",
            ),
            AppError::Unavailable(detail) => {
                debug!(detail = %detail, "service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable",
                )
            }
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let mut response = (status, message.to_string()).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::RateLimited { retry_after_secs } => AppError::RateLimited { retry_after_secs },
            AuthError::InvalidCredentials => {
                AppError::Unauthorized("Invalid email or password".into())
            }
            AuthError::AccountDisabled => {
                AppError::Forbidden("Account disabled. Contact an administrator.".into())
            }
            AuthError::AccountLocked => {
                AppError::Forbidden("Account temporarily locked. Try again later.".into())
            }
            AuthError::InvalidToken(_) | AuthError::RevokedToken => {
                AppError::Unauthorized("Authentication required".into())
            }
            AuthError::ProviderUnavailable(detail) => AppError::Unavailable(detail),
            AuthError::CsrfRejected => AppError::Forbidden("Invalid CSRF token".into()),
            AuthError::OriginRejected => AppError::Forbidden("Origin not allowed".into()),
            AuthError::InsufficientPermission => {
                AppError::Forbidden("Insufficient permissions".into())
            }
            AuthError::TokenError(msg) | AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_sets_retry_after() {
        let resp = AppError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn credentials_failure_is_generic() {
        let err = AppError::from(AuthError::InvalidCredentials);
        assert!(matches!(err, AppError::Unauthorized(ref m) if m == "Invalid email or password"));
    }

    #[test]
    fn internal_detail_is_hidden() {
        let resp = AppError::from(AuthError::Internal("pool exhausted at db-1".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
