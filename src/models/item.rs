//! Discovered posts and their engagement counters.
//!
//! An item is created at most once per canonical URL; the unique constraint
//! arbitrates concurrent discovery passes and the first writer wins. Items
//! are never deleted by this core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::sources::EngagementCounts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub external_id: String,
    pub canonical_url: String,
    pub account_id: Uuid,
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub quotes: i64,
    pub views: i64,
    pub bookmarks: i64,
    pub base_score: i64,
    pub bonus_score: i64,
    pub total_score: i64,
    pub discovered_at: DateTime<Utc>,
    pub metrics_refreshed_at: Option<DateTime<Utc>>,
    pub discovery_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub external_id: String,
    pub canonical_url: String,
    pub account_id: Uuid,
    pub counts: EngagementCounts,
    pub base_score: i64,
    pub bonus_score: i64,
    pub discovery_method: String,
}

const SELECT_COLUMNS: &str = r#"
    id, external_id, canonical_url, account_id,
    likes, reposts, replies, quotes, views, bookmarks,
    base_score, bonus_score, total_score,
    discovered_at, metrics_refreshed_at, discovery_method,
    created_at, updated_at
"#;

impl Item {
    /// Create the item unless its canonical URL already exists. Returns
    /// `Ok(None)` when another writer got there first (unique violation
    /// `23505`), which callers treat as "already discovered, skip".
    pub async fn create_if_new(
        pool: &PgPool,
        new_item: NewItem,
    ) -> Result<Option<Item>, sqlx::Error> {
        let total = new_item.base_score + new_item.bonus_score;
        let result = sqlx::query_as::<_, Item>(&format!(
            r#"
            INSERT INTO engage_items
                (id, external_id, canonical_url, account_id,
                 likes, reposts, replies, quotes, views, bookmarks,
                 base_score, bonus_score, total_score,
                 discovered_at, discovery_method, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    NOW(), $14, NOW(), NOW())
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new_item.external_id)
        .bind(&new_item.canonical_url)
        .bind(new_item.account_id)
        .bind(new_item.counts.likes)
        .bind(new_item.counts.reposts)
        .bind(new_item.counts.replies)
        .bind(new_item.counts.quotes)
        .bind(new_item.counts.views)
        .bind(new_item.counts.bookmarks)
        .bind(new_item.base_score)
        .bind(new_item.bonus_score)
        .bind(total)
        .bind(&new_item.discovery_method)
        .fetch_one(pool)
        .await;

        match result {
            Ok(item) => Ok(Some(item)),
            Err(sqlx::Error::Database(ref db_err)) if db_err.code().as_deref() == Some("23505") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        sqlx::query_as::<_, Item>(&format!(
            "SELECT {SELECT_COLUMNS} FROM engage_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_canonical_url(
        pool: &PgPool,
        canonical_url: &str,
    ) -> Result<Option<Item>, sqlx::Error> {
        sqlx::query_as::<_, Item>(&format!(
            "SELECT {SELECT_COLUMNS} FROM engage_items WHERE canonical_url = $1"
        ))
        .bind(canonical_url)
        .fetch_optional(pool)
        .await
    }

    /// External ids of the most recently discovered items for an account,
    /// used to deduplicate repeated polling cycles.
    pub async fn recent_external_ids(
        pool: &PgPool,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT external_id
            FROM engage_items
            WHERE account_id = $1
            ORDER BY discovered_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Apply a successful engagement refresh: new counters, recomputed bonus,
    /// total kept equal to base + bonus. The base score never changes.
    pub async fn update_engagement(
        pool: &PgPool,
        id: Uuid,
        counts: &EngagementCounts,
        bonus_score: i64,
    ) -> Result<Option<Item>, sqlx::Error> {
        sqlx::query_as::<_, Item>(&format!(
            r#"
            UPDATE engage_items
            SET likes = $2, reposts = $3, replies = $4, quotes = $5,
                views = $6, bookmarks = $7,
                bonus_score = $8,
                total_score = base_score + $8,
                metrics_refreshed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(counts.likes)
        .bind(counts.reposts)
        .bind(counts.replies)
        .bind(counts.quotes)
        .bind(counts.views)
        .bind(counts.bookmarks)
        .bind(bonus_score)
        .fetch_optional(pool)
        .await
    }

    /// Sum of total scores across an account's items, for the auditor.
    pub async fn score_sum_for_account(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(total_score), 0)::BIGINT
            FROM engage_items
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(pool)
        .await
    }

    pub fn counts(&self) -> EngagementCounts {
        EngagementCounts {
            likes: self.likes,
            reposts: self.reposts,
            replies: self.replies,
            quotes: self.quotes,
            views: self.views,
            bookmarks: self.bookmarks,
        }
    }
}
