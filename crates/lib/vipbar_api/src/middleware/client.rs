//! Caller context: client IP, user agent and path.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use vipbar_core::models::auth::ClientContext;

use crate::AppState;

/// Build the caller context.
///
/// `trusted_hops` is the number of reverse proxies in front of the server.
/// Each of them appends the address it saw to `X-Forwarded-For`, so the
/// client is the entry `trusted_hops` from the right. With zero hops the
/// proxy headers are ignored and the socket peer is the client.
pub fn client_context(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    path: &str,
    trusted_hops: usize,
) -> ClientContext {
    let forwarded = (trusted_hops > 0)
        .then(|| forwarded_ip(headers, trusted_hops))
        .flatten();
    ClientContext {
        ip: forwarded.or_else(|| peer.map(|p| p.ip().to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        path: Some(path.to_string()),
    }
}

fn forwarded_ip(headers: &HeaderMap, trusted_hops: usize) -> Option<String> {
    let chain: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if !chain.is_empty() {
        // A chain shorter than the proxy count did not come through them all.
        let hop = chain.len().checked_sub(trusted_hops)?;
        return parse_ip(chain[hop]);
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_ip(v.trim()))
}

fn parse_ip(value: &str) -> Option<String> {
    value.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// Extractor for the caller context. Reuses the one the request pipeline
/// attached, or builds it from the request.
#[derive(Debug, Clone)]
pub struct Client(pub ClientContext);

impl<S> FromRequestParts<S> for Client
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<ClientContext>() {
            return Ok(Client(ctx.clone()));
        }
        let state = AppState::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Client(client_context(
            &parts.headers,
            peer,
            parts.uri.path(),
            state.config.trusted_proxy_hops,
        )))
    }
}
