//! Security headers added to every response.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

const HSTS: &str = "max-age=31536000; includeSubDomains";
const PERMISSIONS_POLICY: &str =
    "camera=(), microphone=(), geolocation=(), payment=(), usb=(), bluetooth=()";

const CSP_PRODUCTION: &str = "default-src 'self'; script-src 'self'; style-src 'self'; \
     img-src 'self' data:; font-src 'self'; connect-src 'self'; frame-ancestors 'none'; \
     base-uri 'self'; form-action 'self'";

const CSP_DEVELOPMENT: &str = "default-src 'self'; script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
     style-src 'self' 'unsafe-inline'; img-src 'self' data: blob:; font-src 'self' data:; \
     connect-src 'self' ws: http://localhost:*; frame-ancestors 'none'";

pub fn apply_security_headers(headers: &mut HeaderMap, production: bool) {
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(if production {
            CSP_PRODUCTION
        } else {
            CSP_DEVELOPMENT
        }),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
}

/// Remove any client-supplied `x-user-*` or `x-auth-source` header.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            let name = name.as_str();
            name.starts_with("x-user-") || name == "x-auth-source"
        })
        .cloned()
        .collect();
    for name in spoofed {
        headers.remove(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csp_depends_on_environment() {
        let mut prod = HeaderMap::new();
        apply_security_headers(&mut prod, true);
        let mut dev = HeaderMap::new();
        apply_security_headers(&mut dev, false);

        assert!(!prod[header::CONTENT_SECURITY_POLICY].to_str().unwrap().contains("unsafe-eval"));
        assert!(dev[header::CONTENT_SECURITY_POLICY].to_str().unwrap().contains("unsafe-eval"));
        assert_eq!(prod[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(prod["permissions-policy"], PERMISSIONS_POLICY);
    }

    #[test]
    fn strips_spoofed_identity() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("admin"));
        headers.insert("x-user-role", HeaderValue::from_static("admin"));
        headers.insert("x-auth-source", HeaderValue::from_static("access_token"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        strip_identity_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-request-id"));
    }
}
