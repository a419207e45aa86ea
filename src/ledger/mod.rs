//! # Points Ledger
//!
//! Idempotent crediting against the append-only ledger, the scoring function,
//! and the consistency auditor that keeps cached balances honest.

pub mod auditor;
pub mod scoring;

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::error::Result;
use crate::models::ledger_entry::{NewLedgerEntry, REASON_DISCOVERY_CREDIT};
use crate::models::Item;
use crate::store::{CreditOutcome, LedgerStore};

pub use auditor::{ConsistencyAuditor, ConsistencyReport, SyncSummary};
pub use scoring::{bonus, score, ScoreBreakdown};

/// Applies discovered items as idempotent credits. Safe to call repeatedly
/// for the same item, e.g. after a crash-and-retry.
pub struct PointsLedger {
    store: Arc<dyn LedgerStore>,
    scoring: ScoringConfig,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn LedgerStore>, scoring: ScoringConfig) -> Self {
        Self { store, scoring }
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Credit an item's total score to its owner, exactly once per item.
    pub async fn credit_discovery(&self, item: &Item) -> Result<CreditOutcome> {
        self.credit(item, REASON_DISCOVERY_CREDIT).await
    }

    /// Credit with an explicit reason tag. One entry per (item, reason).
    pub async fn credit(&self, item: &Item, reason: &str) -> Result<CreditOutcome> {
        let outcome = self
            .store
            .credit_if_absent(NewLedgerEntry {
                account_id: item.account_id,
                amount: item.total_score,
                reason: reason.to_string(),
                item_id: Some(item.id),
            })
            .await?;

        match &outcome {
            CreditOutcome::Credited(entry) => {
                info!(
                    account_id = %item.account_id,
                    item_id = %item.id,
                    amount = entry.amount,
                    reason,
                    "credited points"
                );
            }
            CreditOutcome::AlreadyCredited => {
                debug!(item_id = %item.id, reason, "credit already applied, skipping");
            }
        }

        Ok(outcome)
    }

    pub async fn balance(&self, account_id: Uuid) -> Result<i64> {
        self.store.balance(account_id).await
    }
}
