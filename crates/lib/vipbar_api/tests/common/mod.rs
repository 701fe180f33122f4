//! Shared fixtures for the router integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, Response, header};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use vipbar_api::config::ApiConfig;
use vipbar_api::services::auth::sign_in;
use vipbar_api::{AppState, SecurityState};
use vipbar_core::auth::permissions::{ROLE_CASHIER, ROLE_MANAGER, default_permissions};
use vipbar_core::auth::store::{CredentialStore, MemoryCredentialStore};
use vipbar_core::models::auth::{ClientContext, UserIdentity};

pub const ORIGIN: &str = "http://localhost:3000";
pub const PASSWORD: &str = "correctpw";

pub fn identity(id: &str, email: &str, role: &str) -> UserIdentity {
    UserIdentity {
        id: id.into(),
        email: email.into(),
        full_name: format!("{role} user"),
        role: role.into(),
        display_name: None,
        permissions: default_permissions(role),
        is_active: true,
        locked_until: None,
        failed_login_attempts: 0,
        last_login: None,
    }
}

/// Store seeded with a cashier, a manager and a disabled cashier.
pub fn seeded_store() -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    store
        .insert_user(identity("u-cashier", "cashier@bar.com", ROLE_CASHIER), PASSWORD)
        .expect("seed cashier");
    store
        .insert_user(identity("u-manager", "manager@bar.com", ROLE_MANAGER), PASSWORD)
        .expect("seed manager");
    let mut disabled = identity("u-disabled", "disabled@bar.com", ROLE_CASHIER);
    disabled.is_active = false;
    store.insert_user(disabled, PASSWORD).expect("seed disabled");
    store
}

pub fn state_with(store: Arc<MemoryCredentialStore>) -> AppState {
    let store: Arc<dyn CredentialStore> = store;
    AppState::new(ApiConfig::development(), Some(store), SecurityState::new())
}

/// Echo the identity headers the pipeline attached.
async fn echo_identity(headers: HeaderMap) -> Json<Value> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "userId": get("x-user-id"),
        "email": get("x-user-email"),
        "role": get("x-user-role"),
        "permissions": get("x-user-permissions"),
        "source": get("x-auth-source"),
    }))
}

async fn page() -> &'static str {
    "page"
}

/// The real routes plus a few protected echo routes behind the pipeline.
pub fn app(state: AppState) -> Router {
    let echoes = Router::new()
        .route("/api/pos/whoami", get(echo_identity).post(echo_identity))
        .route("/api/reports", get(echo_identity).post(echo_identity))
        .route("/about", get(echo_identity))
        .route("/dashboard", get(page))
        .route("/admin", get(page));
    vipbar_api::with_pipeline(echoes.merge(vipbar_api::routes()), state)
}

/// Cookie header for a fresh session of `email`.
pub async fn session_cookie(state: &AppState, email: &str) -> String {
    let signed = sign_in(state, email, PASSWORD, &ClientContext::new("10.9.9.9"))
        .await
        .expect("sign in");
    format!(
        "access_token={}; refresh_token={}",
        signed.tokens.access.expect("access token"),
        signed.tokens.refresh.expect("refresh token"),
    )
}

pub fn login_request(email: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::ORIGIN, ORIGIN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({ "email": email, "password": password })).unwrap(),
        ))
        .unwrap()
}

/// Mark `req` as arriving from the socket peer `ip`.
pub fn from_peer<B>(mut req: Request<B>, ip: &str) -> Request<B> {
    let addr = SocketAddr::new(ip.parse().expect("peer ip"), 40000);
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

pub fn set_cookies<B>(resp: &Response<B>) -> Vec<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

pub async fn body_json(resp: Response<Body>) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse JSON")
}
