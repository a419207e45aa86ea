//! Remote (L2) cache seam and its Postgres implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("value rejected: {0}")]
    Rejected(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// The L2 seam. Implementations must be safe for concurrent use.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Postgres-backed L2 over the `engage_cache_entries` table.
#[derive(Debug, Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop expired rows. Intended for periodic administrative invocation.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM engage_cache_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RemoteCache for PgCacheStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT value
            FROM engage_cache_entries
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| CacheError::Rejected(format!("ttl out of range: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO engage_cache_entries (key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value,
                          expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM engage_cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
