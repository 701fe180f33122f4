//! Security event sink.
//!
//! Every security-relevant outcome is recorded here: written to `tracing`
//! under the `security` target, appended to a bounded in-memory ring,
//! optionally persisted, and correlated against [`threats`] patterns. A
//! matched pattern blocks the source IP for an hour and raises a critical
//! `threat_detected` event.

pub mod store;
pub mod threats;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use self::store::SecurityEventStore;
use self::threats::{THREAT_BLOCK_SECS, ThreatDetection, ThreatPattern, default_patterns, detect};
use crate::models::auth::ClientContext;

/// Events kept in the ring.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
/// Events older than this are pruned.
pub const EVENT_RETENTION_DAYS: i64 = 7;
/// Sweep interval for [`SecurityMonitor::spawn_prune_task`].
pub const PRUNE_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

/// Event type names.
pub mod event_types {
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const DEMO_LOGIN_SUCCESS: &str = "demo_login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGOUT: &str = "logout";
    pub const INACTIVE_USER_LOGIN_ATTEMPT: &str = "inactive_user_login_attempt";
    pub const LOCKED_ACCOUNT_LOGIN_ATTEMPT: &str = "locked_account_login_attempt";
    pub const PROVIDER_FALLBACK: &str = "provider_fallback";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const TOKEN_SIGNATURE_INVALID: &str = "token_signature_invalid";
    pub const TOKEN_REFRESHED: &str = "token_refreshed";
    pub const SESSION_INVALID: &str = "session_invalid";
    pub const REFRESH_TOKEN_REUSE: &str = "refresh_token_reuse";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    pub const SQL_INJECTION_ATTEMPT: &str = "sql_injection_attempt";
    pub const XSS_ATTEMPT: &str = "xss_attempt";
    pub const PATH_TRAVERSAL_ATTEMPT: &str = "path_traversal_attempt";
    pub const SUSPICIOUS_USER_AGENT: &str = "suspicious_user_agent";
    pub const CORS_VIOLATION: &str = "cors_violation";
    pub const CSRF_VIOLATION: &str = "csrf_violation";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const BLOCKED_IP_REQUEST: &str = "blocked_ip_request";
    pub const THREAT_DETECTED: &str = "threat_detected";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One structured security log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Value,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            event_type: event_type.into(),
            ip: None,
            user_agent: None,
            details: Value::Object(Map::new()),
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Copy ip, user agent and path from the caller.
    pub fn with_context(mut self, ctx: &ClientContext) -> Self {
        self.ip = ctx.ip.clone();
        self.user_agent = ctx.user_agent.clone();
        if let Some(path) = &ctx.path {
            self = self.with_details(json!({ "path": path }));
        }
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Merge `details` into the existing object.
    pub fn with_details(mut self, details: Value) -> Self {
        match (&mut self.details, details) {
            (Value::Object(existing), Value::Object(extra)) => existing.extend(extra),
            (slot, other) => *slot = other,
        }
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone)]
struct BlockedIp {
    until: DateTime<Utc>,
    reason: String,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// In-memory event ring, IP block list and threat correlator.
pub struct SecurityMonitor {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    blocked_ips: DashMap<String, BlockedIp>,
    patterns: Vec<ThreatPattern>,
    store: Option<Arc<dyn SecurityEventStore>>,
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityMonitor {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_EVENT_CAPACITY,
            blocked_ips: DashMap::new(),
            patterns: default_patterns(),
            store: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<ThreatPattern>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Also persist every event to `store` (fire-and-forget).
    pub fn with_store(mut self, store: Arc<dyn SecurityEventStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn ring(&self) -> MutexGuard<'_, VecDeque<SecurityEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event and run threat correlation for its IP.
    pub fn record(&self, event: SecurityEvent) -> Option<ThreatDetection> {
        trace_event(&event);
        self.persist(&event);

        let now = event.timestamp;
        let ip = event.ip.clone();
        let matched = {
            let mut ring = self.ring();
            ring.push_back(event);
            while ring.len() > self.capacity {
                ring.pop_front();
            }
            match ip.as_deref() {
                Some(ip) if !self.is_ip_blocked_at(ip, now) => {
                    detect(&ring, ip, now, &self.patterns).map(|(p, count)| (p.name, count))
                }
                _ => None,
            }
        };

        let (threat_type, event_count) = matched?;
        let ip = ip?;
        let blocked_until = now + Duration::seconds(THREAT_BLOCK_SECS);
        self.block_ip_until(&ip, blocked_until, threat_type);
        self.record(
            SecurityEvent::new(event_types::THREAT_DETECTED, Severity::Critical)
                .with_ip(ip.clone())
                .with_details(json!({
                    "threatType": threat_type,
                    "eventCount": event_count,
                    "blockedUntil": blocked_until,
                }))
                .at(now),
        );
        Some(ThreatDetection {
            threat_type,
            ip,
            event_count,
            blocked_until,
        })
    }

    fn persist(&self, event: &SecurityEvent) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime; security event not persisted");
            return;
        };
        let event = event.clone();
        handle.spawn(async move {
            if let Err(e) = store.append(&event).await {
                warn!(error = %e, event_type = %event.event_type, "failed to persist security event");
            }
        });
    }

    /// Whether `ip` is currently blocked. Expired blocks are removed.
    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        self.is_ip_blocked_at(ip, Utc::now())
    }

    pub fn is_ip_blocked_at(&self, ip: &str, now: DateTime<Utc>) -> bool {
        self.blocked_until_at(ip, now).is_some()
    }

    /// End of the active block on `ip`, if any.
    pub fn blocked_until(&self, ip: &str) -> Option<DateTime<Utc>> {
        self.blocked_until_at(ip, Utc::now())
    }

    fn blocked_until_at(&self, ip: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = self.blocked_ips.get(ip).map(|b| b.until)?;
        if until > now {
            Some(until)
        } else {
            self.blocked_ips.remove_if(ip, |_, b| b.until <= now);
            None
        }
    }

    /// Block `ip` for `duration`.
    pub fn block_ip(&self, ip: &str, duration: Duration, reason: &str) {
        self.block_ip_until(ip, Utc::now() + duration, reason);
    }

    fn block_ip_until(&self, ip: &str, until: DateTime<Utc>, reason: &str) {
        warn!(target: "security", ip, %until, reason, "blocking IP");
        self.blocked_ips.insert(
            ip.to_string(),
            BlockedIp {
                until,
                reason: reason.to_string(),
            },
        );
    }

    pub fn unblock_ip(&self, ip: &str) -> bool {
        self.blocked_ips.remove(ip).is_some()
    }

    /// Currently blocked IPs with the reason for each.
    pub fn blocked_ips(&self) -> Vec<(String, DateTime<Utc>, String)> {
        let now = Utc::now();
        self.blocked_ips
            .iter()
            .filter(|b| b.until > now)
            .map(|b| (b.key().clone(), b.until, b.reason.clone()))
            .collect()
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        let ring = self.ring();
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<SecurityEvent> {
        self.ring()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    /// Remove events older than the retention period and expired blocks.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(EVENT_RETENTION_DAYS);
        let removed = {
            let mut ring = self.ring();
            let before = ring.len();
            ring.retain(|e| e.timestamp >= cutoff);
            before - ring.len()
        };
        self.blocked_ips.retain(|_, b| b.until > now);
        removed
    }

    /// Spawn the hourly prune sweep, including the persisted log when a store
    /// is configured.
    pub fn spawn_prune_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let now = Utc::now();
                let removed = monitor.prune_at(now);
                if removed > 0 {
                    debug!(removed, "pruned security events");
                }
                if let Some(store) = &monitor.store {
                    let cutoff = now - Duration::days(EVENT_RETENTION_DAYS);
                    if let Err(e) = store.prune_older_than(cutoff).await {
                        warn!(error = %e, "failed to prune persisted security events");
                    }
                }
            }
        })
    }
}

fn trace_event(event: &SecurityEvent) {
    let ip = event.ip.as_deref().unwrap_or("-");
    let kind = event.event_type.as_str();
    let details = &event.details;
    match event.severity {
        Severity::Low => debug!(target: "security", kind, ip, %details, "security event"),
        Severity::Medium => info!(target: "security", kind, ip, %details, "security event"),
        Severity::High => warn!(target: "security", kind, ip, %details, "security event"),
        Severity::Critical => error!(target: "security", kind, ip, %details, "security event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::StoreError;
    use async_trait::async_trait;

    fn failed_login(ip: &str) -> SecurityEvent {
        SecurityEvent::new(event_types::LOGIN_FAILED, Severity::Medium).with_ip(ip)
    }

    #[test]
    fn ring_is_bounded() {
        let monitor = SecurityMonitor::new().with_capacity(3);
        for i in 0..5 {
            monitor.record(SecurityEvent::new(format!("e{i}"), Severity::Low));
        }
        let kinds: Vec<_> = monitor
            .recent_events(10)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds, ["e2", "e3", "e4"]);
    }

    #[test]
    fn five_failed_logins_block_the_ip() {
        let monitor = SecurityMonitor::new();
        for _ in 0..4 {
            assert!(monitor.record(failed_login("1.2.3.4")).is_none());
        }
        assert!(!monitor.is_ip_blocked("1.2.3.4"));

        let detection = monitor.record(failed_login("1.2.3.4")).unwrap();
        assert_eq!(detection.threat_type, "brute_force_login");
        assert_eq!(detection.event_count, 5);
        assert!(monitor.is_ip_blocked("1.2.3.4"));
        assert!(!monitor.is_ip_blocked("5.6.7.8"));

        let threats = monitor.events_of_type(event_types::THREAT_DETECTED);
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].severity, Severity::Critical);
        assert_eq!(threats[0].details["threatType"], "brute_force_login");

        // Already blocked: no second escalation.
        assert!(monitor.record(failed_login("1.2.3.4")).is_none());
        assert_eq!(monitor.events_of_type(event_types::THREAT_DETECTED).len(), 1);
    }

    #[test]
    fn blocks_expire() {
        let monitor = SecurityMonitor::new();
        monitor.block_ip("1.2.3.4", Duration::hours(1), "manual");
        let now = Utc::now();
        assert!(monitor.is_ip_blocked_at("1.2.3.4", now));
        assert!(!monitor.is_ip_blocked_at("1.2.3.4", now + Duration::minutes(61)));
        assert!(monitor.blocked_ips().is_empty());
    }

    #[test]
    fn prune_drops_old_events() {
        let monitor = SecurityMonitor::new();
        let now = Utc::now();
        monitor.record(SecurityEvent::new("old", Severity::Low).at(now - Duration::days(8)));
        monitor.record(SecurityEvent::new("new", Severity::Low).at(now));
        assert_eq!(monitor.prune_at(now), 1);
        assert_eq!(monitor.recent_events(10)[0].event_type, "new");
    }

    #[test]
    fn details_merge_and_serialize() {
        let ctx = ClientContext {
            ip: Some("1.2.3.4".into()),
            user_agent: Some("curl/8".into()),
            path: Some("/api/auth/login".into()),
        };
        let event = SecurityEvent::new(event_types::LOGIN_FAILED, Severity::Medium)
            .with_context(&ctx)
            .with_details(json!({ "email": "user@bar.com" }));
        assert_eq!(event.details["path"], "/api/auth/login");
        assert_eq!(event.details["email"], "user@bar.com");

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "login_failed");
        assert_eq!(wire["severity"], "medium");
        assert_eq!(wire["userAgent"], "curl/8");
    }

    struct CollectingStore(Mutex<Vec<SecurityEvent>>);

    #[async_trait]
    impl SecurityEventStore for CollectingStore {
        async fn append(&self, event: &SecurityEvent) -> Result<(), StoreError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn prune_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn events_are_persisted_in_the_background() {
        let store = Arc::new(CollectingStore(Mutex::new(Vec::new())));
        let monitor = SecurityMonitor::new().with_store(store.clone());
        monitor.record(failed_login("1.2.3.4"));

        for _ in 0..50 {
            if !store.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        assert_eq!(store.0.lock().unwrap().len(), 1);
    }
}
