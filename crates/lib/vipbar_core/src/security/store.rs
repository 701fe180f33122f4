//! Persistent security event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::SecurityEvent;
use crate::auth::store::StoreError;
use crate::uuid::uuidv7;

/// Append-only sink for security events.
#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    async fn append(&self, event: &SecurityEvent) -> Result<(), StoreError>;

    /// Delete events recorded before `cutoff`, returning how many went.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Writes to the `security_events` table.
#[derive(Clone)]
pub struct PgSecurityEventStore {
    pool: PgPool,
}

impl PgSecurityEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecurityEventStore for PgSecurityEventStore {
    async fn append(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO security_events (id, event_type, severity, ip_address, user_agent, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(uuidv7())
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(event.ip.as_deref())
        .bind(event.user_agent.as_deref())
        .bind(sqlx::types::Json(&event.details))
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM security_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
