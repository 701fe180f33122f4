//! Authentication stage of the request pipeline: session resolution, CSRF
//! double-submit check and identity propagation.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum_extra::extract::cookie::CookieJar;
use subtle::ConstantTimeEq;
use vipbar_core::auth::demo::is_demo_subject;
use vipbar_core::auth::permissions;
use vipbar_core::models::auth::{AccessClaims, PermissionMap, UserIdentity};

use crate::services::cookies::{CSRF_COOKIE, CSRF_HEADER};

/// Where the session was proven from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    AccessToken,
    /// The access token was missing or stale; the refresh token reissued it.
    RefreshToken,
}

impl AuthSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthSource::AccessToken => "access_token",
            AuthSource::RefreshToken => "refresh_token",
        }
    }
}

/// Stored in request extensions for authenticated requests.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub permissions: PermissionMap,
    pub full_name: Option<String>,
    pub is_demo: bool,
    pub source: AuthSource,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: AccessClaims) -> Self {
        Self {
            is_demo: is_demo_subject(&claims.sub),
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
            permissions: claims.permissions,
            full_name: None,
            source: AuthSource::AccessToken,
        }
    }

    pub fn from_identity(user: &UserIdentity, source: AuthSource) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            full_name: Some(user.full_name.clone()),
            is_demo: is_demo_subject(&user.id),
            source,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        permissions::has_permission(&self.role, &self.permissions, permission)
    }

    /// Names of granted permissions, in map order.
    pub fn granted_permissions(&self) -> Vec<&str> {
        self.permissions
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Set the `x-user-*` and `x-auth-source` headers for downstream handlers.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let permissions = self.granted_permissions().join(",");
        let values = [
            ("x-user-id", self.user_id.as_str()),
            ("x-user-email", self.email.as_str()),
            ("x-user-role", self.role.as_str()),
            ("x-user-permissions", permissions.as_str()),
            ("x-auth-source", self.source.as_str()),
        ];
        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
    }
}

/// Double-submit check: the `x-csrf-token` header must equal the
/// `csrf-token` cookie. Compared in constant time.
pub fn csrf_token_matches(headers: &HeaderMap, jar: &CookieJar) -> bool {
    let Some(header) = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return false;
    };
    let Some(cookie) = jar.get(CSRF_COOKIE).filter(|c| !c.value().is_empty()) else {
        return false;
    };
    header.as_bytes().ct_eq(cookie.value().as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use vipbar_core::auth::permissions::{ROLE_CASHIER, default_permissions};

    fn cashier() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "demo-cashier".into(),
            email: "cashier@barvip.com".into(),
            role: ROLE_CASHIER.into(),
            permissions: default_permissions(ROLE_CASHIER),
            full_name: None,
            is_demo: true,
            source: AuthSource::RefreshToken,
        }
    }

    #[test]
    fn writes_identity_headers() {
        let mut headers = HeaderMap::new();
        cashier().write_headers(&mut headers);
        assert_eq!(headers["x-user-id"], "demo-cashier");
        assert_eq!(headers["x-user-role"], "cashier");
        assert_eq!(headers["x-user-permissions"], "members.view,pos.access,products.view");
        assert_eq!(headers["x-auth-source"], "refresh_token");
    }

    #[test]
    fn csrf_requires_matching_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("csrf-token=abc123"));
        let jar = CookieJar::from_headers(&headers);

        assert!(!csrf_token_matches(&headers, &jar));
        headers.insert(CSRF_HEADER, HeaderValue::from_static("abc124"));
        assert!(!csrf_token_matches(&headers, &jar));
        headers.insert(CSRF_HEADER, HeaderValue::from_static("abc123"));
        assert!(csrf_token_matches(&headers, &jar));
    }
}
