//! Origin and Referer checks for API routes.

use axum::http::{HeaderMap, Method, header};
use url::Url;

use crate::config::{ApiConfig, normalize_origin};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginCheck {
    Allowed,
    /// Cross-origin source not on the allow-list.
    Rejected(String),
    /// State-changing request with neither `Origin` nor `Referer`.
    Missing,
}

pub fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Check `Origin` (or `Referer` as a stand-in) against the allow-list.
/// Same-origin requests, judged against `Host`, always pass.
pub fn check_origin(config: &ApiConfig, headers: &HeaderMap, method: &Method) -> OriginCheck {
    let source = header_str(headers, header::ORIGIN).or_else(|| header_str(headers, header::REFERER));
    match source {
        Some(source) => {
            if config.is_origin_allowed(source) || is_same_origin(source, headers) {
                OriginCheck::Allowed
            } else {
                OriginCheck::Rejected(source.to_string())
            }
        }
        None if is_state_changing(method) => OriginCheck::Missing,
        None => OriginCheck::Allowed,
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_same_origin(source: &str, headers: &HeaderMap) -> bool {
    let Some(host) = header_str(headers, header::HOST) else {
        return false;
    };
    let Some(origin) = normalize_origin(source) else {
        return false;
    };
    let Ok(url) = Url::parse(&origin) else {
        return false;
    };
    let Some(origin_host) = url.host_str() else {
        return false;
    };
    let authority = match url.port() {
        Some(port) => format!("{origin_host}:{port}"),
        None => origin_host.to_string(),
    };
    authority.eq_ignore_ascii_case(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn allow_listed_origin_passes() {
        let config = ApiConfig::development();
        let h = headers(&[(header::ORIGIN, "http://localhost:3000")]);
        assert_eq!(check_origin(&config, &h, &Method::POST), OriginCheck::Allowed);
    }

    #[test]
    fn foreign_origin_is_rejected() {
        let config = ApiConfig::development();
        let h = headers(&[(header::ORIGIN, "https://evil.example")]);
        assert_eq!(
            check_origin(&config, &h, &Method::GET),
            OriginCheck::Rejected("https://evil.example".into())
        );
    }

    #[test]
    fn same_origin_passes_without_allow_list() {
        let config = ApiConfig::development();
        let h = headers(&[
            (header::ORIGIN, "http://pos.internal:8080"),
            (header::HOST, "pos.internal:8080"),
        ]);
        assert_eq!(check_origin(&config, &h, &Method::POST), OriginCheck::Allowed);
    }

    #[test]
    fn referer_stands_in_for_origin() {
        let config = ApiConfig::development();
        let ok = headers(&[(header::REFERER, "http://localhost:3000/pos")]);
        assert_eq!(check_origin(&config, &ok, &Method::POST), OriginCheck::Allowed);
        let bad = headers(&[(header::REFERER, "https://evil.example/x")]);
        assert!(matches!(check_origin(&config, &bad, &Method::POST), OriginCheck::Rejected(_)));
    }

    #[test]
    fn missing_source_only_matters_for_writes() {
        let config = ApiConfig::development();
        assert_eq!(check_origin(&config, &HeaderMap::new(), &Method::GET), OriginCheck::Allowed);
        assert_eq!(check_origin(&config, &HeaderMap::new(), &Method::DELETE), OriginCheck::Missing);
    }
}
