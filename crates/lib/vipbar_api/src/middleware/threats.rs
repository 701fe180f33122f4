//! Heuristic request inspection. Findings are recorded, never blocked here;
//! blocking follows from threat correlation in the monitor.

use axum::http::Uri;
use serde_json::json;
use url::form_urlencoded;
use vipbar_core::auth::validation::{
    contains_path_traversal, contains_sql_injection, contains_xss, is_suspicious_user_agent,
};
use vipbar_core::models::auth::ClientContext;
use vipbar_core::security::{SecurityEvent, SecurityMonitor, Severity, event_types};

/// Inspect the request line and user agent, returning the event types recorded.
pub fn inspect_request(
    monitor: &SecurityMonitor,
    uri: &Uri,
    ctx: &ClientContext,
) -> Vec<&'static str> {
    let mut found = Vec::new();
    let raw = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    if contains_path_traversal(raw) {
        found.push(event_types::PATH_TRAVERSAL_ATTEMPT);
    }

    if let Some(query) = uri.query() {
        let decoded = decode_query(query);
        if contains_sql_injection(&decoded) {
            found.push(event_types::SQL_INJECTION_ATTEMPT);
        }
        if contains_xss(&decoded) {
            found.push(event_types::XSS_ATTEMPT);
        }
    }

    for event_type in &found {
        monitor.record(
            SecurityEvent::new(*event_type, Severity::High)
                .with_context(ctx)
                .with_details(json!({ "uri": raw })),
        );
    }

    // Page requests only.
    if !is_api_path(uri.path())
        && let Some(agent) = ctx.user_agent.as_deref()
        && is_suspicious_user_agent(agent)
    {
        monitor.record(
            SecurityEvent::new(event_types::SUSPICIOUS_USER_AGENT, Severity::Low)
                .with_context(ctx)
                .with_details(json!({ "userAgent": agent })),
        );
        found.push(event_types::SUSPICIOUS_USER_AGENT);
    }

    found
}

fn is_api_path(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn decode_query(query: &str) -> String {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}
