//! Append-only points ledger entries: the authoritative source of truth for
//! account balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

/// Reason tag for the one-per-item discovery credit.
pub const REASON_DISCOVERY_CREDIT: &str = "discovery-credit";

/// Reason prefix for auditor repair entries.
pub const REASON_CONSISTENCY_REPAIR: &str = "consistency-repair";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub item_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub account_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub item_id: Option<Uuid>,
}

impl LedgerEntry {
    /// Insert an entry inside a caller-managed transaction. The partial
    /// unique index on (item_id, reason) makes a duplicate item credit come
    /// back as `Ok(None)` instead of a second entry.
    pub async fn insert_if_absent(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        new_entry: &NewLedgerEntry,
    ) -> Result<Option<LedgerEntry>, sqlx::Error> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO engage_ledger_entries
                (id, account_id, amount, reason, item_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (item_id, reason) WHERE item_id IS NOT NULL
            DO NOTHING
            RETURNING id, account_id, amount, reason, item_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_entry.account_id)
        .bind(new_entry.amount)
        .bind(&new_entry.reason)
        .bind(new_entry.item_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn find_by_item_and_reason(
        pool: &PgPool,
        item_id: Uuid,
        reason: &str,
    ) -> Result<Option<LedgerEntry>, sqlx::Error> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, account_id, amount, reason, item_id, created_at
            FROM engage_ledger_entries
            WHERE item_id = $1 AND reason = $2
            "#,
        )
        .bind(item_id)
        .bind(reason)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_account(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, account_id, amount, reason, item_id, created_at
            FROM engage_ledger_entries
            WHERE account_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    pub async fn sum_for_account(pool: &PgPool, account_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM engage_ledger_entries
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(pool)
        .await
    }
}
