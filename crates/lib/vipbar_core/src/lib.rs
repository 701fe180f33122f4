//! # vipbar_core
//!
//! Core authentication domain logic for VIP Bar Management: token codec,
//! credential store interface, demo-mode fallback, login rate limiting and
//! security event correlation.

pub mod auth;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod security;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
