//! Threat-pattern correlation over recent security events.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use super::{SecurityEvent, event_types};

/// How long a correlated threat blocks the source IP.
pub const THREAT_BLOCK_SECS: i64 = 60 * 60;

/// N matching events from one IP inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreatPattern {
    pub name: &'static str,
    pub event_types: &'static [&'static str],
    pub threshold: usize,
    pub window_secs: i64,
}

pub const BRUTE_FORCE_LOGIN: ThreatPattern = ThreatPattern {
    name: "brute_force_login",
    event_types: &[event_types::LOGIN_FAILED],
    threshold: 5,
    window_secs: 5 * 60,
};

pub const INJECTION_ATTACK: ThreatPattern = ThreatPattern {
    name: "injection_attack",
    event_types: &[
        event_types::SQL_INJECTION_ATTEMPT,
        event_types::XSS_ATTEMPT,
        event_types::PATH_TRAVERSAL_ATTEMPT,
    ],
    threshold: 3,
    window_secs: 10 * 60,
};

pub const RATE_LIMIT_ABUSE: ThreatPattern = ThreatPattern {
    name: "rate_limit_abuse",
    event_types: &[event_types::RATE_LIMIT_EXCEEDED],
    threshold: 10,
    window_secs: 5 * 60,
};

pub fn default_patterns() -> Vec<ThreatPattern> {
    vec![BRUTE_FORCE_LOGIN, INJECTION_ATTACK, RATE_LIMIT_ABUSE]
}

/// A pattern that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatDetection {
    pub threat_type: &'static str,
    pub ip: String,
    pub event_count: usize,
    pub blocked_until: DateTime<Utc>,
}

/// First pattern whose threshold `ip` reaches at `now`, with its count.
pub fn detect<'p>(
    events: &VecDeque<SecurityEvent>,
    ip: &str,
    now: DateTime<Utc>,
    patterns: &'p [ThreatPattern],
) -> Option<(&'p ThreatPattern, usize)> {
    patterns.iter().find_map(|pattern| {
        let since = now - Duration::seconds(pattern.window_secs);
        let count = events
            .iter()
            .filter(|e| {
                e.timestamp > since
                    && e.ip.as_deref() == Some(ip)
                    && pattern.event_types.contains(&e.event_type.as_str())
            })
            .count();
        (count >= pattern.threshold).then_some((pattern, count))
    })
}
