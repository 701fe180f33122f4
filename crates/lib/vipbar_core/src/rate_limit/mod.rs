//! Login rate limiting with progressive lockout.
//!
//! Two independent tracks: failures per normalized email and failures per
//! client IP. Each track blocks once its failure threshold is reached inside
//! the rolling window; the block doubles with every further consecutive
//! failure up to a cap. A successful sign-in clears the email track only, so
//! one user's success on a shared IP never unblocks another.
//!
//! [`LoginRateLimiter::check_login_attempt`] never mutates;
//! [`LoginRateLimiter::record_login_attempt`] is the only writer and is
//! called once per attempt after its outcome is known.

pub mod route;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Sweep interval for [`LoginRateLimiter::spawn_cleanup_task`].
pub const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);

/// Maximum exponent applied to the base block duration.
const MAX_PENALTY_EXPONENT: u32 = 16;

// ---------------------------------------------------------------------------
// Records and storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAttempt {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Per-key attempt history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginAttemptRecord {
    pub attempts: Vec<LoginAttempt>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl LoginAttemptRecord {
    fn failures_since(&self, since: DateTime<Utc>) -> usize {
        self.attempts
            .iter()
            .filter(|a| !a.success && a.timestamp > since)
            .count()
    }

    fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

/// Backing storage for attempt records.
///
/// Updates run under the store's per-key lock and must not block. The
/// in-memory store is per process; a shared implementation makes the limits
/// hold across instances.
pub trait RateLimitStore: Send + Sync {
    fn get(&self, key: &str) -> Option<LoginAttemptRecord>;

    /// Read-modify-write `key`, creating an empty record first if needed.
    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut LoginAttemptRecord));

    /// Keep only the records for which `keep` returns true.
    fn retain(&self, keep: &mut dyn FnMut(&str, &LoginAttemptRecord) -> bool);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`RateLimitStore`] backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    records: DashMap<String, LoginAttemptRecord>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn get(&self, key: &str) -> Option<LoginAttemptRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut LoginAttemptRecord)) {
        let mut entry = self.records.entry(key.to_string()).or_default();
        apply(entry.value_mut());
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &LoginAttemptRecord) -> bool) {
        self.records.retain(|k, v| keep(k.as_str(), &*v));
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

/// Which track produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitTrack {
    Email,
    Ip,
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the longest active block ends; 0 when allowed.
    pub retry_after_secs: u64,
    pub blocked_by: Option<LimitTrack>,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            blocked_by: None,
        }
    }
}

/// Thresholds and durations.
#[derive(Debug, Clone)]
pub struct LoginRateLimitConfig {
    pub max_attempts_per_email: u32,
    pub max_attempts_per_ip: u32,
    pub window: Duration,
    pub base_block: Duration,
    pub max_block: Duration,
}

impl Default for LoginRateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_email: 3,
            max_attempts_per_ip: 10,
            window: Duration::minutes(15),
            base_block: Duration::minutes(15),
            max_block: Duration::hours(24),
        }
    }
}

impl LoginRateLimitConfig {
    /// `base_block * 2^(consecutive - threshold)`, capped at `max_block`.
    pub fn block_duration(&self, consecutive_failures: u32, threshold: u32) -> Duration {
        let exponent = consecutive_failures
            .saturating_sub(threshold)
            .min(MAX_PENALTY_EXPONENT);
        let factor = 1i32 << exponent;
        (self.base_block * factor).min(self.max_block)
    }
}

/// Progressive login lockout over email and IP tracks.
pub struct LoginRateLimiter {
    config: LoginRateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self::with_store(
            LoginRateLimitConfig::default(),
            Arc::new(MemoryRateLimitStore::new()),
        )
    }

    pub fn with_store(config: LoginRateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &LoginRateLimitConfig {
        &self.config
    }

    /// Pure admission check for a sign-in attempt.
    pub fn check_login_attempt(&self, email: &str, ip: &str) -> RateLimitDecision {
        self.check_at(email, ip, Utc::now())
    }

    pub fn check_at(&self, email: &str, ip: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut decision = RateLimitDecision::allow();
        for (track, key) in [
            (LimitTrack::Email, email_key(email)),
            (LimitTrack::Ip, ip_key(ip)),
        ] {
            let Some(record) = self.store.get(&key) else {
                continue;
            };
            if let Some(until) = record.blocked_until.filter(|u| *u > now) {
                let retry = seconds_until(now, until);
                if retry > decision.retry_after_secs {
                    decision = RateLimitDecision {
                        allowed: false,
                        retry_after_secs: retry,
                        blocked_by: Some(track),
                    };
                }
            }
        }
        decision
    }

    /// Record the outcome of an admitted attempt.
    pub fn record_login_attempt(&self, email: &str, ip: &str, success: bool) {
        self.record_at(email, ip, success, Utc::now());
    }

    pub fn record_at(&self, email: &str, ip: &str, success: bool, now: DateTime<Utc>) {
        let config = &self.config;
        self.store.update(&email_key(email), &mut |record: &mut LoginAttemptRecord| {
            if success {
                record.consecutive_failures = 0;
                record.blocked_until = None;
                record.attempts.retain(|a| a.success);
                push_attempt(record, config, now, true);
            } else {
                record_failure(record, config, config.max_attempts_per_email, now);
            }
        });
        self.store.update(&ip_key(ip), &mut |record: &mut LoginAttemptRecord| {
            if success {
                push_attempt(record, config, now, true);
            } else {
                record_failure(record, config, config.max_attempts_per_ip, now);
            }
        });
    }

    /// Current email-track record.
    pub fn email_record(&self, email: &str) -> Option<LoginAttemptRecord> {
        self.store.get(&email_key(email))
    }

    /// Current IP-track record.
    pub fn ip_record(&self, ip: &str) -> Option<LoginAttemptRecord> {
        self.store.get(&ip_key(ip))
    }

    /// Drop keys with no in-window attempts and no active block.
    pub fn cleanup(&self) {
        self.cleanup_at(Utc::now());
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        let window_start = now - self.config.window;
        let before = self.store.len();
        self.store.retain(&mut |_: &str, record: &LoginAttemptRecord| {
            record.is_blocked_at(now) || record.attempts.iter().any(|a| a.timestamp > window_start)
        });
        let removed = before.saturating_sub(self.store.len());
        if removed > 0 {
            debug!(removed, "pruned login rate-limit records");
        }
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

fn email_key(email: &str) -> String {
    format!("email:{}", email.trim().to_lowercase())
}

fn ip_key(ip: &str) -> String {
    format!("ip:{ip}")
}

fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

fn push_attempt(
    record: &mut LoginAttemptRecord,
    config: &LoginRateLimitConfig,
    now: DateTime<Utc>,
    success: bool,
) {
    let window_start = now - config.window;
    record.attempts.retain(|a| a.timestamp > window_start);
    record.attempts.push(LoginAttempt {
        timestamp: now,
        success,
    });
    record.last_attempt = Some(now);
}

fn record_failure(
    record: &mut LoginAttemptRecord,
    config: &LoginRateLimitConfig,
    threshold: u32,
    now: DateTime<Utc>,
) {
    // Consecutive failures decay after a full quiet window.
    let quiet_since = match (record.last_attempt, record.blocked_until) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    if quiet_since.is_some_and(|t| now - t >= config.window) {
        record.consecutive_failures = 0;
    }

    push_attempt(record, config, now, false);
    record.consecutive_failures += 1;

    let failures = record.failures_since(now - config.window) as u32;
    if failures >= threshold {
        let block = config.block_duration(record.consecutive_failures, threshold);
        record.blocked_until = Some(now + block);
        debug!(
            failures,
            consecutive = record.consecutive_failures,
            block_secs = block.num_seconds(),
            "login track blocked"
        );
    }
}
