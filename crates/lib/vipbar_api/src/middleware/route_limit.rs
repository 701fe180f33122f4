//! Per-route request limits applied before authentication.

use axum::http::Method;
use vipbar_core::rate_limit::route::{IDENTITY_RULE, LOGIN_RULE, RouteRule};

/// The limit that applies to `method path`, if any.
pub fn rule_for(method: &Method, path: &str) -> Option<&'static RouteRule> {
    match (method, path) {
        (&Method::POST, "/api/auth/login") => Some(&LOGIN_RULE),
        (&Method::GET, "/api/auth/me") => Some(&IDENTITY_RULE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_routes_are_limited() {
        assert_eq!(rule_for(&Method::POST, "/api/auth/login").map(|r| r.name), Some("login"));
        assert_eq!(rule_for(&Method::GET, "/api/auth/me").map(|r| r.name), Some("identity"));
        assert!(rule_for(&Method::GET, "/api/auth/login").is_none());
        assert!(rule_for(&Method::GET, "/api/products").is_none());
    }
}
