//! Per-account monitoring trail: the durable answer to "why did my account
//! not update". Upserted after every attempt, success or failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringState {
    Active,
    Paused,
    Error,
}

impl MonitoringState {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitoringState::Active => "active",
            MonitoringState::Paused => "paused",
            MonitoringState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MonitoringStatus {
    pub account_id: Uuid,
    pub last_checked_at: DateTime<Utc>,
    pub items_found: i64,
    pub state: String,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoringStatus {
    /// Record the outcome of a monitoring attempt. `items_found` accumulates;
    /// state and error reflect the latest attempt only.
    pub async fn record_attempt(
        pool: &PgPool,
        account_id: Uuid,
        new_items: i64,
        state: MonitoringState,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO engage_monitoring_statuses
                (account_id, last_checked_at, items_found, state, last_error, updated_at)
            VALUES ($1, NOW(), $2, $3, $4, NOW())
            ON CONFLICT (account_id)
            DO UPDATE SET last_checked_at = NOW(),
                          items_found = engage_monitoring_statuses.items_found + EXCLUDED.items_found,
                          state = EXCLUDED.state,
                          last_error = EXCLUDED.last_error,
                          updated_at = NOW()
            "#,
        )
        .bind(account_id)
        .bind(new_items)
        .bind(state.as_str())
        .bind(last_error)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_account(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<Option<MonitoringStatus>, sqlx::Error> {
        sqlx::query_as::<_, MonitoringStatus>(
            r#"
            SELECT account_id, last_checked_at, items_found, state, last_error, updated_at
            FROM engage_monitoring_statuses
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(pool)
        .await
    }
}
