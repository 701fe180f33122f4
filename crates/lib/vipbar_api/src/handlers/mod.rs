//! Request handlers.

pub mod auth;
pub mod health;

use axum::http::StatusCode;

/// Fallback for unmatched paths. Routed explicitly so the request pipeline
/// wraps it too.
pub async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
