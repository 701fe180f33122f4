//! Coarse per-route request limits keyed by client IP.
//!
//! Sits in front of specific endpoints, independent of the login limiter.
//! Penalized rules block for `window * 2^(violations - 1)` after each trip.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::CLEANUP_INTERVAL;

const MAX_PENALTY: i64 = 24 * 60 * 60;
const MAX_PENALTY_EXPONENT: u32 = 16;

/// A request allowance for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRule {
    pub name: &'static str,
    pub max_requests: u32,
    pub window_secs: i64,
    /// Apply an exponential penalty on consecutive violations.
    pub penalize: bool,
}

/// Sign-in: 3 attempts per 15 minutes.
pub const LOGIN_RULE: RouteRule = RouteRule {
    name: "login",
    max_requests: 3,
    window_secs: 15 * 60,
    penalize: true,
};

/// Current-identity lookups: called on nearly every page, so far more lenient.
pub const IDENTITY_RULE: RouteRule = RouteRule {
    name: "identity",
    max_requests: 120,
    window_secs: 60,
    penalize: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allowed,
    Limited { retry_after_secs: u64, violations: u32 },
}

#[derive(Debug, Default)]
struct RouteBucket {
    hits: VecDeque<DateTime<Utc>>,
    violations: u32,
    last_violation: Option<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
    window_secs: i64,
}

/// Sliding-window limiter over `(rule, ip)` buckets.
#[derive(Debug, Default)]
pub struct RouteRateLimiter {
    buckets: DashMap<(&'static str, String), RouteBucket>,
}

impl RouteRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request against `rule`; admitted requests consume allowance.
    pub fn check(&self, rule: &RouteRule, ip: &str) -> RouteDecision {
        self.check_at(rule, ip, Utc::now())
    }

    pub fn check_at(&self, rule: &RouteRule, ip: &str, now: DateTime<Utc>) -> RouteDecision {
        let window = Duration::seconds(rule.window_secs);
        let mut bucket = self
            .buckets
            .entry((rule.name, ip.to_string()))
            .or_default();
        bucket.window_secs = rule.window_secs;

        if let Some(until) = bucket.blocked_until.filter(|u| *u > now) {
            return RouteDecision::Limited {
                retry_after_secs: seconds_until(now, until),
                violations: bucket.violations,
            };
        }
        // Violations decay after a full quiet window past the last penalty.
        let quiet_since = bucket.blocked_until.or(bucket.last_violation);
        if quiet_since.is_some_and(|t| now - t >= window) {
            bucket.violations = 0;
        }

        let window_start = now - window;
        while bucket.hits.front().is_some_and(|t| *t <= window_start) {
            bucket.hits.pop_front();
        }

        if bucket.hits.len() as u32 >= rule.max_requests {
            bucket.violations += 1;
            bucket.last_violation = Some(now);
            let retry_at = if rule.penalize {
                let exponent = (bucket.violations - 1).min(MAX_PENALTY_EXPONENT);
                let penalty = (window * (1i32 << exponent)).min(Duration::seconds(MAX_PENALTY));
                let until = now + penalty;
                bucket.blocked_until = Some(until);
                until
            } else {
                bucket.hits.front().map_or(now, |oldest| *oldest + window)
            };
            debug!(rule = rule.name, ip, violations = bucket.violations, "route limit tripped");
            return RouteDecision::Limited {
                retry_after_secs: seconds_until(now, retry_at),
                violations: bucket.violations,
            };
        }

        bucket.hits.push_back(now);
        RouteDecision::Allowed
    }

    /// Drop idle buckets.
    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        self.buckets.retain(|_, b| {
            let window_start = now - Duration::seconds(b.window_secs);
            b.blocked_until.is_some_and(|u| u > now)
                || b.hits.back().is_some_and(|t| *t > window_start)
                || b.last_violation.is_some_and(|t| t > window_start)
        });
    }

    pub fn cleanup(&self) {
        self.cleanup_at(Utc::now());
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawn the periodic cleanup sweep.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        })
    }
}

fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
