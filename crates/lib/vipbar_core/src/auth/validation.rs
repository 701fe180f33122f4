//! Sign-in input validation and injection heuristics.
//!
//! Validation failures never reach the rate limiter or the credential store.

use std::sync::LazyLock;

use regex::Regex;

use super::AuthError;

pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

static INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(<\s*script|javascript:|on(error|load)\s*=|union\s+(all\s+)?select|drop\s+table|insert\s+into|delete\s+from|;\s*--|'\s*or\s+'?1'?\s*=\s*'?1|\bor\s+1\s*=\s*1\b)",
    )
    .expect("valid injection regex")
});

static SQL_INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(union\s+(all\s+)?select|drop\s+table|insert\s+into|delete\s+from|;\s*--|'\s*or\s+'?1'?\s*=\s*'?1|\bor\s+1\s*=\s*1\b|sleep\s*\(|benchmark\s*\()",
    )
    .expect("valid sql regex")
});

static XSS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(<\s*script|javascript:|on(error|load)\s*=|<\s*iframe)")
        .expect("valid xss regex")
});

static TRAVERSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.\./|\.\.\\|%2e%2e(%2f|/|%5c)|\.\.%2f|%252e%252e)")
        .expect("valid traversal regex")
});

static SCANNER_UA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(sqlmap|nikto|nmap|masscan|zgrab|dirbuster|gobuster|wpscan|nuclei|acunetix|python-requests|scrapy|httrack|^$)",
    )
    .expect("valid user agent regex")
});

/// Why a sign-in payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRejection {
    pub reason: &'static str,
    /// Whether the input looked like an injection attempt rather than a typo.
    pub injection: bool,
}

impl From<InputRejection> for AuthError {
    fn from(r: InputRejection) -> Self {
        AuthError::Validation(r.reason.to_string())
    }
}

/// Trim and lowercase an email for lookups and rate-limit keys.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate a sign-in payload's shape.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), InputRejection> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(InputRejection {
            reason: "email and password are required",
            injection: false,
        });
    }
    if contains_injection(email) || contains_injection(password) {
        return Err(InputRejection {
            reason: "input contains disallowed content",
            injection: true,
        });
    }
    if email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(email) {
        return Err(InputRejection {
            reason: "invalid email format",
            injection: false,
        });
    }
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(InputRejection {
            reason: "password length out of bounds",
            injection: false,
        });
    }
    Ok(())
}

/// Obvious SQL-injection or XSS shapes.
pub fn contains_injection(input: &str) -> bool {
    INJECTION_RE.is_match(input)
}

pub fn contains_sql_injection(input: &str) -> bool {
    SQL_INJECTION_RE.is_match(input)
}

pub fn contains_xss(input: &str) -> bool {
    XSS_RE.is_match(input)
}

/// `../` and its encoded variants.
pub fn contains_path_traversal(input: &str) -> bool {
    TRAVERSAL_RE.is_match(input)
}

/// Known scanners, scrapers and empty user agents.
pub fn is_suspicious_user_agent(user_agent: &str) -> bool {
    SCANNER_UA_RE.is_match(user_agent.trim())
}
