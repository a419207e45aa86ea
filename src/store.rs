//! # Storage Seam
//!
//! The router and ledger operate on these traits rather than on a pool
//! directly, so tests can run the full orchestration against in-memory
//! implementations. Production wires the Postgres implementations, which
//! delegate to the model layer.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{EngageError, Result};
use crate::models::{
    Account, Item, LedgerEntry, MonitoringState, NewItem, NewLedgerEntry,
};
use crate::models::ledger_entry::REASON_CONSISTENCY_REPAIR;
use crate::sources::EngagementCounts;

/// Outcome of an idempotent credit attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CreditOutcome {
    Credited(LedgerEntry),
    /// An entry for this (item, reason) already exists; nothing was changed.
    AlreadyCredited,
}

/// Outcome of a balance repair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RepairOutcome {
    NothingToRepair,
    Repaired { delta: i64, entry: LedgerEntry },
}

/// Persistence the source health router needs.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>>;

    async fn find_item(&self, item_id: Uuid) -> Result<Option<Item>>;

    /// First writer wins on canonical URL; `None` means already stored.
    async fn create_item_if_new(&self, new_item: NewItem) -> Result<Option<Item>>;

    async fn update_item_engagement(
        &self,
        item_id: Uuid,
        counts: &EngagementCounts,
        bonus_score: i64,
    ) -> Result<Option<Item>>;

    async fn recent_external_ids(&self, account_id: Uuid, limit: i64) -> Result<Vec<String>>;

    async fn record_monitoring(
        &self,
        account_id: Uuid,
        new_items: i64,
        state: MonitoringState,
        last_error: Option<&str>,
    ) -> Result<()>;

    async fn touch_account_checked(&self, account_id: Uuid) -> Result<()>;
}

/// Persistence the points ledger and auditor need.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically insert the entry and bump the account balance, unless an
    /// entry with the same (item, reason) already exists.
    async fn credit_if_absent(&self, new_entry: NewLedgerEntry) -> Result<CreditOutcome>;

    async fn balance(&self, account_id: Uuid) -> Result<i64>;

    async fn ledger_sum(&self, account_id: Uuid) -> Result<i64>;

    async fn item_score_sum(&self, account_id: Uuid) -> Result<i64>;

    /// Rematerialize balance from the ledger sum and append an auditable
    /// zero-amount correction entry recording the applied delta.
    async fn repair_balance(&self, account_id: Uuid) -> Result<RepairOutcome>;

    async fn accounts_with_nonzero_balance(&self) -> Result<Vec<Uuid>>;
}

/// Postgres-backed [`EngagementStore`].
#[derive(Debug, Clone)]
pub struct PgEngagementStore {
    pool: PgPool,
}

impl PgEngagementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EngagementStore for PgEngagementStore {
    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>> {
        Ok(Account::find_by_id(&self.pool, account_id).await?)
    }

    async fn find_item(&self, item_id: Uuid) -> Result<Option<Item>> {
        Ok(Item::find_by_id(&self.pool, item_id).await?)
    }

    async fn create_item_if_new(&self, new_item: NewItem) -> Result<Option<Item>> {
        Ok(Item::create_if_new(&self.pool, new_item).await?)
    }

    async fn update_item_engagement(
        &self,
        item_id: Uuid,
        counts: &EngagementCounts,
        bonus_score: i64,
    ) -> Result<Option<Item>> {
        Ok(Item::update_engagement(&self.pool, item_id, counts, bonus_score).await?)
    }

    async fn recent_external_ids(&self, account_id: Uuid, limit: i64) -> Result<Vec<String>> {
        Ok(Item::recent_external_ids(&self.pool, account_id, limit).await?)
    }

    async fn record_monitoring(
        &self,
        account_id: Uuid,
        new_items: i64,
        state: MonitoringState,
        last_error: Option<&str>,
    ) -> Result<()> {
        Ok(crate::models::MonitoringStatus::record_attempt(
            &self.pool, account_id, new_items, state, last_error,
        )
        .await?)
    }

    async fn touch_account_checked(&self, account_id: Uuid) -> Result<()> {
        Ok(Account::touch_checked(&self.pool, account_id).await?)
    }
}

/// Postgres-backed [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn credit_if_absent(&self, new_entry: NewLedgerEntry) -> Result<CreditOutcome> {
        let mut tx = self.pool.begin().await?;

        // Lock the balance row so concurrent credits serialize.
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM engage_accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(new_entry.account_id)
        .fetch_optional(&mut *tx)
        .await?;

        if balance.is_none() {
            return Err(EngageError::AccountNotFound(new_entry.account_id));
        }

        let Some(entry) = LedgerEntry::insert_if_absent(&mut tx, &new_entry).await? else {
            tx.rollback().await?;
            return Ok(CreditOutcome::AlreadyCredited);
        };

        sqlx::query(
            r#"
            UPDATE engage_accounts
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(new_entry.account_id)
        .bind(new_entry.amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreditOutcome::Credited(entry))
    }

    async fn balance(&self, account_id: Uuid) -> Result<i64> {
        let account = Account::find_by_id(&self.pool, account_id)
            .await?
            .ok_or(EngageError::AccountNotFound(account_id))?;
        Ok(account.balance)
    }

    async fn ledger_sum(&self, account_id: Uuid) -> Result<i64> {
        Ok(LedgerEntry::sum_for_account(&self.pool, account_id).await?)
    }

    async fn item_score_sum(&self, account_id: Uuid) -> Result<i64> {
        Ok(Item::score_sum_for_account(&self.pool, account_id).await?)
    }

    async fn repair_balance(&self, account_id: Uuid) -> Result<RepairOutcome> {
        let mut tx = self.pool.begin().await?;

        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM engage_accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(EngageError::AccountNotFound(account_id))?;

        let ledger_sum = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM engage_ledger_entries
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;

        let delta = ledger_sum - balance;
        if delta == 0 {
            tx.rollback().await?;
            return Ok(RepairOutcome::NothingToRepair);
        }

        sqlx::query(
            r#"
            UPDATE engage_accounts
            SET balance = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(ledger_sum)
        .execute(&mut *tx)
        .await?;

        // Zero amount keeps the ledger sum untouched; the reason records the
        // delta applied to the balance.
        let correction = NewLedgerEntry {
            account_id,
            amount: 0,
            reason: format!("{REASON_CONSISTENCY_REPAIR}:{delta:+}"),
            item_id: None,
        };
        let entry = LedgerEntry::insert_if_absent(&mut tx, &correction)
            .await?
            .ok_or_else(|| {
                EngageError::Configuration("repair entry insert returned no row".to_string())
            })?;

        tx.commit().await?;
        Ok(RepairOutcome::Repaired { delta, entry })
    }

    async fn accounts_with_nonzero_balance(&self) -> Result<Vec<Uuid>> {
        Ok(Account::ids_with_nonzero_balance(&self.pool).await?)
    }
}
