//! Platform accounts that own items and accrue points.
//!
//! `balance` is a derived cache of the ledger sum. It is mutated only through
//! ledger credit operations and the auditor's repair, never directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::sources::AccountRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub external_id: String,
    pub username: String,
    pub balance: i64,
    pub monitoring_enabled: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub check_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub external_id: String,
    pub username: String,
    pub monitoring_enabled: bool,
}

impl Account {
    pub async fn create(pool: &PgPool, new_account: NewAccount) -> Result<Account, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO engage_accounts
                (id, external_id, username, balance, monitoring_enabled,
                 check_count, created_at, updated_at)
            VALUES ($1, $2, $3, 0, $4, 0, NOW(), NOW())
            RETURNING id, external_id, username, balance, monitoring_enabled,
                      last_checked_at, check_count, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_account.external_id)
        .bind(new_account.username)
        .bind(new_account.monitoring_enabled)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, external_id, username, balance, monitoring_enabled,
                   last_checked_at, check_count, created_at, updated_at
            FROM engage_accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, external_id, username, balance, monitoring_enabled,
                   last_checked_at, check_count, created_at, updated_at
            FROM engage_accounts
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(pool)
        .await
    }

    /// Accounts the batch auditor considers: anything with a nonzero balance.
    pub async fn ids_with_nonzero_balance(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM engage_accounts WHERE balance <> 0 ORDER BY id",
        )
        .fetch_all(pool)
        .await
    }

    /// Record a completed monitoring attempt against this account.
    pub async fn touch_checked(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE engage_accounts
            SET last_checked_at = NOW(),
                check_count = check_count + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn source_ref(&self) -> AccountRef {
        AccountRef {
            account_id: self.id,
            external_id: self.external_id.clone(),
            username: self.username.clone(),
        }
    }
}
