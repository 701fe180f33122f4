//! Cookie service: set, read and clear the httpOnly session cookies.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use time::Duration;
use vipbar_core::auth::jwt::{ACCESS_TOKEN_EXPIRY_SECS, REFRESH_TOKEN_EXPIRY_SECS};

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";
/// Marker cookie telling the front end a session exists.
pub const SESSION_COOKIE: &str = "auth_session";
/// Double-submit CSRF cookie, readable by scripts.
pub const CSRF_COOKIE: &str = "csrf-token";
/// Header that must echo the CSRF cookie on state-changing API calls.
pub const CSRF_HEADER: &str = "x-csrf-token";

const CSRF_TOKEN_LEN: usize = 64;

/// Tokens found on a request. Empty cookie values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl SessionTokens {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// Builds the session cookies with one set of attributes.
#[derive(Debug, Clone, Copy)]
pub struct SessionCookieManager {
    secure: bool,
}

impl SessionCookieManager {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    /// Add access, refresh and session-marker cookies.
    pub fn set_auth_cookies(&self, jar: CookieJar, access: &str, refresh: &str) -> CookieJar {
        let jar = self.set_access_cookie(jar, access);
        self.set_refresh_cookie(jar, refresh)
    }

    pub fn set_access_cookie(&self, jar: CookieJar, access: &str) -> CookieJar {
        jar.add(self.build(ACCESS_COOKIE, access, ACCESS_TOKEN_EXPIRY_SECS))
    }

    /// Refresh cookie plus the session marker, which shares its lifetime.
    pub fn set_refresh_cookie(&self, jar: CookieJar, refresh: &str) -> CookieJar {
        jar.add(self.build(REFRESH_COOKIE, refresh, REFRESH_TOKEN_EXPIRY_SECS))
            .add(self.build(SESSION_COOKIE, "1", REFRESH_TOKEN_EXPIRY_SECS))
    }

    /// Overwrite all three session cookies with empty, expired values.
    pub fn clear_auth_cookies(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.build(ACCESS_COOKIE, "", 0))
            .add(self.build(REFRESH_COOKIE, "", 0))
            .add(self.build(SESSION_COOKIE, "", 0))
    }

    pub fn read_tokens(&self, jar: &CookieJar) -> SessionTokens {
        SessionTokens {
            access: read_value(jar, ACCESS_COOKIE),
            refresh: read_value(jar, REFRESH_COOKIE),
        }
    }

    /// Not httpOnly: the page echoes it back in `x-csrf-token`.
    pub fn csrf_cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build((CSRF_COOKIE.to_string(), token.to_string()))
            .http_only(false)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .path("/".to_string())
            .max_age(Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS))
            .build()
    }

    fn build(&self, name: &str, value: &str, max_age_secs: i64) -> Cookie<'static> {
        Cookie::build((name.to_string(), value.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .path("/".to_string())
            .max_age(Duration::seconds(max_age_secs))
            .build()
    }
}

fn read_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Random CSRF token (64 alphanumeric chars).
pub fn generate_csrf_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header};

    fn set_cookie_headers(jar: CookieJar) -> Vec<String> {
        use axum::response::IntoResponse;
        let resp = (jar, "").into_response();
        resp.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn auth_cookies_carry_attributes() {
        let cookies = SessionCookieManager::new(true);
        let headers = set_cookie_headers(cookies.set_auth_cookies(CookieJar::new(), "acc", "ref"));
        assert_eq!(headers.len(), 3);
        for h in &headers {
            assert!(h.contains("HttpOnly"), "{h}");
            assert!(h.contains("SameSite=Strict"), "{h}");
            assert!(h.contains("Secure"), "{h}");
            assert!(h.contains("Path=/"), "{h}");
        }
        assert!(headers.iter().any(|h| h.starts_with("access_token=acc") && h.contains("Max-Age=900")));
        assert!(headers.iter().any(|h| h.starts_with("refresh_token=ref") && h.contains("Max-Age=604800")));
        assert!(headers.iter().any(|h| h.starts_with("auth_session=")));
    }

    #[test]
    fn insecure_outside_production() {
        let cookies = SessionCookieManager::new(false);
        let headers = set_cookie_headers(cookies.set_access_cookie(CookieJar::new(), "acc"));
        assert!(!headers[0].contains("Secure"));
    }

    #[test]
    fn clearing_expires_everything() {
        let cookies = SessionCookieManager::new(false);
        let headers = set_cookie_headers(cookies.clear_auth_cookies(CookieJar::new()));
        assert_eq!(headers.len(), 3);
        assert!(headers.iter().all(|h| h.contains("Max-Age=0")));
    }

    #[test]
    fn reads_tokens_ignoring_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("access_token=; refresh_token=abc"),
        );
        let jar = CookieJar::from_headers(&headers);
        let tokens = SessionCookieManager::new(false).read_tokens(&jar);
        assert_eq!(tokens.access, None);
        assert_eq!(tokens.refresh.as_deref(), Some("abc"));
    }

    #[test]
    fn reads_back_the_tokens_it_set() {
        let cookies = SessionCookieManager::new(true);
        let jar = cookies.set_auth_cookies(CookieJar::new(), "acc.token.sig", "ref.token.sig");
        let tokens = cookies.read_tokens(&jar);
        assert_eq!(tokens.access.as_deref(), Some("acc.token.sig"));
        assert_eq!(tokens.refresh.as_deref(), Some("ref.token.sig"));

        let cleared = cookies.read_tokens(&cookies.clear_auth_cookies(jar));
        assert!(cleared.is_empty());
    }

    #[test]
    fn csrf_cookie_is_script_readable() {
        let token = generate_csrf_token();
        assert_eq!(token.len(), 64);
        let cookie = SessionCookieManager::new(false).csrf_cookie(&token);
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(cookie.name(), CSRF_COOKIE);
    }
}
