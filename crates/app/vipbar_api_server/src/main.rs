//! VIP Bar Management auth API server binary.
//!
//! Reads configuration from the environment (and `.env`), connects to
//! PostgreSQL when `DATABASE_URL` is set, and serves the auth API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use vipbar_api::config::ApiConfig;
use vipbar_api::{AppState, SecurityState};
use vipbar_core::auth::password::hash_password;
use vipbar_core::auth::permissions::ROLE_ADMIN;
use vipbar_core::auth::queries::{
    PgCredentialStore, admin_exists, create_user, purge_expired_refresh_tokens,
};
use vipbar_core::auth::store::CredentialStore;
use vipbar_core::security::SecurityMonitor;
use vipbar_core::security::store::PgSecurityEventStore;

const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "vipbar_api_server", about = "VIP Bar auth API server")]
struct Args {
    /// Address to listen on. Overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL. Without it sign-in runs on demo accounts.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Create this admin on start-up when no admin exists yet.
    #[arg(long, env = "SEED_ADMIN_EMAIL", requires = "seed_admin_password")]
    seed_admin_email: Option<String>,

    #[arg(long, env = "SEED_ADMIN_PASSWORD", hide_env_values = true)]
    seed_admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vipbar_api=debug,vipbar_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.database_url.filter(|u| !u.is_empty()) {
        config.database_url = Some(url);
    }

    info!(
        bind_addr = %config.bind_addr,
        environment = ?config.environment,
        database = config.database_url.is_some(),
        demo_mode = config.demo_password.is_some(),
        rotate_refresh_tokens = config.rotate_refresh_tokens,
        "starting vipbar_api_server"
    );

    let (store, monitor) = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect_lazy(url)?;

            // Unreachable databases are tolerated: sign-in falls back to demo accounts.
            info!("running database migrations");
            match vipbar_api::migrate(&pool).await {
                Ok(()) => {
                    if let (Some(email), Some(password)) =
                        (&args.seed_admin_email, &args.seed_admin_password)
                    {
                        seed_admin(&pool, email, password).await;
                    }
                }
                Err(e) => warn!(error = %e, "database migrations failed"),
            }
            spawn_token_purge(pool.clone());

            let store: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));
            let monitor = SecurityMonitor::new().with_store(Arc::new(PgSecurityEventStore::new(pool)));
            (Some(store), monitor)
        }
        None => {
            warn!("DATABASE_URL not set; credential store disabled");
            (None, SecurityMonitor::new())
        }
    };

    let security = SecurityState::with_monitor(monitor);
    security.spawn_sweeps();

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, store, security);
    let app = vipbar_api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "auth API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    Ok(())
}

async fn seed_admin(pool: &PgPool, email: &str, password: &str) {
    match admin_exists(pool).await {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "could not check for an existing admin");
            return;
        }
    }
    let hash = match hash_password(password) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(error = %e, "could not hash seed admin password");
            return;
        }
    };
    match create_user(pool, email, "Administrator", ROLE_ADMIN, &hash).await {
        Ok(id) => info!(user_id = %id, email, "seeded admin user"),
        Err(e) => warn!(error = %e, "failed to seed admin user"),
    }
}

fn spawn_token_purge(pool: PgPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOKEN_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match purge_expired_refresh_tokens(&pool).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged expired refresh tokens"),
                Err(e) => warn!(error = %e, "refresh token purge failed"),
            }
        }
    });
}
