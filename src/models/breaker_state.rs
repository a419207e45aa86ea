//! Persisted circuit breaker state, one row per source name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BreakerStateRow {
    pub source_name: String,
    pub state: String,
    pub failure_count: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub override_expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BreakerStateRow {
    pub async fn find_by_source(
        pool: &PgPool,
        source_name: &str,
    ) -> Result<Option<BreakerStateRow>, sqlx::Error> {
        sqlx::query_as::<_, BreakerStateRow>(
            r#"
            SELECT source_name, state, failure_count, last_failure_at,
                   next_retry_at, override_expires_at, updated_at
            FROM engage_breaker_states
            WHERE source_name = $1
            "#,
        )
        .bind(source_name)
        .fetch_optional(pool)
        .await
    }

    /// Write-through on every breaker transition; one row per source.
    pub async fn upsert(
        pool: &PgPool,
        source_name: &str,
        state: &str,
        failure_count: i32,
        last_failure_at: Option<DateTime<Utc>>,
        next_retry_at: Option<DateTime<Utc>>,
        override_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO engage_breaker_states
                (source_name, state, failure_count, last_failure_at,
                 next_retry_at, override_expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (source_name)
            DO UPDATE SET state = EXCLUDED.state,
                          failure_count = EXCLUDED.failure_count,
                          last_failure_at = EXCLUDED.last_failure_at,
                          next_retry_at = EXCLUDED.next_retry_at,
                          override_expires_at = EXCLUDED.override_expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(source_name)
        .bind(state)
        .bind(failure_count)
        .bind(last_failure_at)
        .bind(next_retry_at)
        .bind(override_expires_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<BreakerStateRow>, sqlx::Error> {
        sqlx::query_as::<_, BreakerStateRow>(
            r#"
            SELECT source_name, state, failure_count, last_failure_at,
                   next_retry_at, override_expires_at, updated_at
            FROM engage_breaker_states
            ORDER BY source_name
            "#,
        )
        .fetch_all(pool)
        .await
    }
}
