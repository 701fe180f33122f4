//! Request authorization pipeline.
//!
//! Stages run in order and the first failing stage produces the response:
//! blocked IP, method allow-list, origin check, route rate limits, threat
//! inspection (record only), authentication, CSRF, route permissions. Every
//! response leaving the pipeline carries the security headers.

pub mod auth;
pub mod client;
pub mod headers;
pub mod origin;
pub mod route_limit;
pub mod routes;
pub mod threats;

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde_json::json;
use tracing::debug;
use url::form_urlencoded;
use vipbar_core::auth::AuthError;
use vipbar_core::models::auth::ClientContext;
use vipbar_core::rate_limit::route::RouteDecision;
use vipbar_core::security::{SecurityEvent, Severity, event_types};

use crate::AppState;
use crate::error::AppError;
use crate::services::auth::current_identity;

use self::auth::csrf_token_matches;
use self::origin::{OriginCheck, check_origin, is_state_changing};

const ALLOWED_METHODS: &[Method] = &[
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::HEAD,
];

/// Axum middleware running the full pipeline.
pub async fn request_pipeline(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let production = state.config.is_production();
    let mut response = run_pipeline(&state, request, next).await;
    headers::apply_security_headers(response.headers_mut(), production);
    response
}

async fn run_pipeline(state: &AppState, mut request: Request, next: Next) -> Response {
    headers::strip_identity_headers(request.headers_mut());

    let path = request.uri().path().to_string();
    let method = request.method().clone();
    let is_api = path.starts_with("/api");
    let ctx = request_context(&request, state.config.trusted_proxy_hops);
    let monitor = &state.security.monitor;

    // Blocked IP
    if let Some(ip) = ctx.ip.as_deref()
        && let Some(until) = monitor.blocked_until(ip)
    {
        monitor.record(
            SecurityEvent::new(event_types::BLOCKED_IP_REQUEST, Severity::Low).with_context(&ctx),
        );
        let retry_after_secs = (until - Utc::now()).num_seconds().max(1) as u64;
        return AppError::RateLimited { retry_after_secs }.into_response();
    }

    if !ALLOWED_METHODS.contains(&method) {
        return AppError::MethodNotAllowed.into_response();
    }

    // Origin
    if is_api {
        match check_origin(&state.config, request.headers(), &method) {
            OriginCheck::Allowed => {}
            OriginCheck::Rejected(origin) => {
                monitor.record(
                    SecurityEvent::new(event_types::CORS_VIOLATION, Severity::Medium)
                        .with_context(&ctx)
                        .with_details(json!({ "origin": origin, "method": method.as_str() })),
                );
                return AppError::from(AuthError::OriginRejected).into_response();
            }
            OriginCheck::Missing => {
                monitor.record(
                    SecurityEvent::new(event_types::CORS_VIOLATION, Severity::Low)
                        .with_context(&ctx)
                        .with_details(json!({ "reason": "missing origin", "method": method.as_str() })),
                );
                return AppError::Validation("Missing Origin header".into()).into_response();
            }
        }
    }

    // Route rate limits
    if let Some(rule) = route_limit::rule_for(&method, &path)
        && let RouteDecision::Limited {
            retry_after_secs,
            violations,
        } = state.security.route_limiter.check(rule, ctx.ip_or_unknown())
    {
        monitor.record(
            SecurityEvent::new(event_types::RATE_LIMIT_EXCEEDED, Severity::Medium)
                .with_context(&ctx)
                .with_details(json!({ "scope": rule.name, "violations": violations })),
        );
        return AppError::RateLimited { retry_after_secs }.into_response();
    }

    threats::inspect_request(monitor, request.uri(), &ctx);

    request.extensions_mut().insert(ctx.clone());

    if method == Method::OPTIONS || routes::is_public(&path) {
        return next.run(request).await;
    }
    let Some(route) = routes::lookup(&path) else {
        return next.run(request).await;
    };

    // Authentication
    let jar = CookieJar::from_headers(request.headers());
    if state.cookies().read_tokens(&jar).is_empty() {
        debug!(path = %path, "no session cookies");
        return deny_unauthenticated(&path, is_api, jar);
    }
    let (jar, user) = match current_identity(state, jar, &ctx).await {
        Ok(found) => found,
        Err(e) => {
            monitor.record(
                SecurityEvent::new(event_types::SESSION_INVALID, Severity::High)
                    .with_context(&ctx)
                    .with_details(json!({ "error": e.to_string() })),
            );
            let jar = state
                .cookies()
                .clear_auth_cookies(CookieJar::from_headers(request.headers()));
            return deny_unauthenticated(&path, is_api, jar);
        }
    };

    // CSRF
    if is_api && is_state_changing(&method) && !csrf_token_matches(request.headers(), &jar) {
        monitor.record(
            SecurityEvent::new(event_types::CSRF_VIOLATION, Severity::High)
                .with_context(&ctx)
                .with_details(json!({ "userId": user.user_id, "method": method.as_str() })),
        );
        let denied = AppError::from(AuthError::CsrfRejected);
        return (jar, denied).into_response();
    }

    // Route permissions
    let Some(requirement) = route.requirement_for(method.as_str()) else {
        return (jar, AppError::MethodNotAllowed).into_response();
    };
    if !requirement.is_met_by(&user) {
        monitor.record(
            SecurityEvent::new(event_types::PERMISSION_DENIED, Severity::Medium)
                .with_context(&ctx)
                .with_details(json!({
                    "userId": user.user_id,
                    "role": user.role,
                    "method": method.as_str(),
                    "required": requirement.describe(),
                })),
        );
        if is_api {
            let denied = AppError::from(AuthError::InsufficientPermission);
            return (jar, denied).into_response();
        }
        return (jar, redirect("/dashboard")).into_response();
    }

    user.write_headers(request.headers_mut());
    request.extensions_mut().insert(user);
    let response = next.run(request).await;
    (jar, response).into_response()
}

fn deny_unauthenticated(path: &str, is_api: bool, jar: CookieJar) -> Response {
    if is_api {
        let denied = AppError::Unauthorized("Authentication required".into());
        return (jar, denied).into_response();
    }
    let target: String = form_urlencoded::byte_serialize(path.as_bytes()).collect();
    (jar, redirect(&format!("/login?redirectTo={target}"))).into_response()
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => (StatusCode::FOUND, [(header::LOCATION, HeaderValue::from_static("/login"))])
            .into_response(),
    }
}

fn request_context(request: &Request, trusted_hops: usize) -> ClientContext {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client::client_context(request.headers(), peer, request.uri().path(), trusted_hops)
}
