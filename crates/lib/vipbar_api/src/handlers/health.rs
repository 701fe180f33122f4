//! Liveness endpoint.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /health`: server status and which sign-in modes are available.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = if state.store.is_some() {
        "configured"
    } else {
        "not_configured"
    };
    Json(HealthResponse {
        status: "ok".into(),
        version: vipbar_core::version().into(),
        database: database.into(),
        demo_mode: state.demo.is_enabled(),
    })
}
