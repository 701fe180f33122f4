//! API server configuration.

use tracing::warn;
use url::Url;
use vipbar_core::auth::AuthError;
use vipbar_core::auth::demo::DEFAULT_DEMO_PASSWORD;
use vipbar_core::auth::jwt::{SigningSecret, resolve_jwt_secret};

/// Origins accepted in development when `ALLOWED_ORIGINS` is unset.
const DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:3100",
    "http://127.0.0.1:3100",
];

/// Origins accepted in production when `ALLOWED_ORIGINS` is unset.
const PROD_ORIGINS: &[&str] = &["https://barvip.com", "https://www.barvip.com"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// `production`/`prod` (any case) is production; anything else is not.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Configuration for the API server, read once at start-up.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    pub environment: Environment,
    /// PostgreSQL connection URL. `None` leaves the credential store
    /// unconfigured and sign-in runs in demo mode.
    pub database_url: Option<String>,
    /// JWT signing secret.
    pub jwt_secret: SigningSecret,
    /// Exact origins (`scheme://host[:port]`) allowed on API routes.
    pub allowed_origins: Vec<String>,
    /// Password for the demo accounts; `None` disables demo mode.
    pub demo_password: Option<String>,
    /// Issue a new refresh token on every refresh and revoke the old one.
    pub rotate_refresh_tokens: bool,
    /// Reverse proxies in front of the server. Zero ignores
    /// `X-Forwarded-For` / `X-Real-IP` and uses the socket peer.
    pub trusted_proxy_hops: usize,
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                 | Default                                  |
    /// |--------------------------|------------------------------------------|
    /// | `BIND_ADDR`              | `127.0.0.1:3100`                         |
    /// | `APP_ENV`                | `development`                            |
    /// | `DATABASE_URL`           | unset (demo mode)                        |
    /// | `JWT_SECRET` / `AUTH_SECRET` | dev secret outside production        |
    /// | `ALLOWED_ORIGINS`        | per-environment list                     |
    /// | `DEMO_PASSWORD`          | dev default; disabled in production      |
    /// | `REFRESH_TOKEN_ROTATION` | `false`                                  |
    /// | `TRUSTED_PROXY_HOPS`     | `0` (socket peer is the client)          |
    ///
    /// Fails when production is configured with an unusable signing secret.
    pub fn from_env() -> Result<Self, AuthError> {
        let environment = Environment::parse(&env_or("APP_ENV", "development"));
        let production = environment.is_production();

        let allowed_origins = match std::env::var("ALLOWED_ORIGINS") {
            Ok(list) if !list.trim().is_empty() => parse_origins(&list),
            _ => default_origins(environment),
        };

        let demo_password = match std::env::var("DEMO_PASSWORD") {
            Ok(p) if !p.is_empty() => Some(p),
            _ if production => None,
            _ => {
                warn!("DEMO_PASSWORD not set; demo accounts use the development default");
                Some(DEFAULT_DEMO_PASSWORD.to_string())
            }
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:3100"),
            environment,
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            jwt_secret: resolve_jwt_secret(production)?,
            allowed_origins,
            demo_password,
            rotate_refresh_tokens: env_flag("REFRESH_TOKEN_ROTATION", false),
            trusted_proxy_hops: env_count("TRUSTED_PROXY_HOPS", 0),
        })
    }

    /// Development defaults without reading the environment.
    pub fn development() -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            environment: Environment::Development,
            database_url: None,
            jwt_secret: SigningSecret::development(),
            allowed_origins: default_origins(Environment::Development),
            demo_password: Some(DEFAULT_DEMO_PASSWORD.to_string()),
            rotate_refresh_tokens: false,
            trusted_proxy_hops: 0,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    /// Cookies carry `Secure` in production only.
    pub fn secure_cookies(&self) -> bool {
        self.is_production()
    }

    /// Whether `origin` is on the allow-list.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        normalize_origin(origin).is_some_and(|o| self.allowed_origins.iter().any(|a| *a == o))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_count(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!(name, value = %v, "ignoring non-numeric value");
            default
        }),
        Err(_) => default,
    }
}

fn default_origins(environment: Environment) -> Vec<String> {
    let list = if environment.is_production() {
        PROD_ORIGINS
    } else {
        DEV_ORIGINS
    };
    list.iter().map(|s| s.to_string()).collect()
}

fn parse_origins(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|o| {
            let normalized = normalize_origin(o);
            if normalized.is_none() && !o.trim().is_empty() {
                warn!(origin = o.trim(), "ignoring malformed entry in ALLOWED_ORIGINS");
            }
            normalized
        })
        .collect()
}

/// `scheme://host[:port]` of a URL or origin string.
pub fn normalize_origin(value: &str) -> Option<String> {
    let url = Url::parse(value.trim()).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}
