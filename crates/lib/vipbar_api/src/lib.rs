//! # vipbar_api
//!
//! HTTP authentication and request authorization for VIP Bar Management.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::{get, post};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use vipbar_core::auth::demo::DemoDirectory;
use vipbar_core::auth::jwt::TokenCodec;
use vipbar_core::auth::store::CredentialStore;
use vipbar_core::rate_limit::LoginRateLimiter;
use vipbar_core::rate_limit::route::RouteRateLimiter;
use vipbar_core::security::SecurityMonitor;

use crate::config::ApiConfig;
use crate::handlers::{auth, health};
use crate::services::cookies::{CSRF_HEADER, SessionCookieManager};

/// Process-wide limiter and monitor state. Tests build their own.
#[derive(Clone)]
pub struct SecurityState {
    pub login_limiter: Arc<LoginRateLimiter>,
    pub route_limiter: Arc<RouteRateLimiter>,
    pub monitor: Arc<SecurityMonitor>,
}

impl Default for SecurityState {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityState {
    pub fn new() -> Self {
        Self::with_monitor(SecurityMonitor::new())
    }

    pub fn with_monitor(monitor: SecurityMonitor) -> Self {
        Self {
            login_limiter: Arc::new(LoginRateLimiter::new()),
            route_limiter: Arc::new(RouteRateLimiter::new()),
            monitor: Arc::new(monitor),
        }
    }

    /// Start the periodic limiter cleanup and event pruning tasks.
    pub fn spawn_sweeps(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.login_limiter.spawn_cleanup_task(),
            self.route_limiter.spawn_cleanup_task(),
            self.monitor.spawn_prune_task(),
        ]
    }
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub codec: Arc<TokenCodec>,
    /// `None` when no database is configured; sign-in then uses demo accounts.
    pub store: Option<Arc<dyn CredentialStore>>,
    pub demo: Arc<DemoDirectory>,
    pub security: SecurityState,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Option<Arc<dyn CredentialStore>>,
        security: SecurityState,
    ) -> Self {
        let codec = TokenCodec::new(&config.jwt_secret).with_monitor(Arc::clone(&security.monitor));
        let demo = DemoDirectory::new(config.demo_password.clone());
        Self {
            config,
            codec: Arc::new(codec),
            store,
            demo: Arc::new(demo),
            security,
        }
    }

    pub fn cookies(&self) -> SessionCookieManager {
        SessionCookieManager::new(self.config.secure_cookies())
    }
}

/// Run embedded database migrations.
///
/// Delegates to `vipbar_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    vipbar_core::migrate::migrate(pool).await
}

/// Auth and health routes, without state or the pipeline.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/api/auth/logout", post(auth::logout_handler))
        .route("/api/auth/refresh", post(auth::refresh_handler))
        .route("/api/auth/me", get(auth::me_handler))
        .route("/api/auth/csrf", get(auth::csrf_handler))
        .fallback(handlers::not_found_handler)
}

/// Wrap `router` in CORS and the request pipeline and attach state.
///
/// The pipeline is the outermost layer so rejected requests still get the
/// security headers.
pub fn with_pipeline(router: Router<AppState>, state: AppState) -> Router {
    router
        .layer(cors_layer(&state.config))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_pipeline,
        ))
        .with_state(state)
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    with_pipeline(routes(), state)
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(CSRF_HEADER)])
}
