//! Ledger invariant coverage: idempotent crediting, drift detection, repair
//! with an auditable correction entry, and the batch sync pass.

mod common;

use std::sync::Arc;

use chrono::Utc;
use tokio_test::assert_ok;
use uuid::Uuid;

use engage_core::config::ScoringConfig;
use engage_core::ledger::{ConsistencyAuditor, PointsLedger};
use engage_core::models::Item;
use engage_core::store::{CreditOutcome, LedgerStore, RepairOutcome};
use engage_core::EngageError;

use common::MemoryLedgerStore;

fn scored_item(account_id: Uuid, total_score: i64) -> Item {
    let now = Utc::now();
    Item {
        id: Uuid::new_v4(),
        external_id: "42".to_string(),
        canonical_url: format!("https://example.com/p/{}", Uuid::new_v4()),
        account_id,
        likes: 0,
        reposts: 0,
        replies: 0,
        quotes: 0,
        views: 0,
        bookmarks: 0,
        base_score: total_score,
        bonus_score: 0,
        total_score,
        discovered_at: now,
        metrics_refreshed_at: None,
        discovery_method: "auto-api".to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn ledger_over(store: &Arc<MemoryLedgerStore>) -> PointsLedger {
    PointsLedger::new(
        Arc::clone(store) as Arc<dyn LedgerStore>,
        ScoringConfig::default(),
    )
}

fn auditor_over(store: &Arc<MemoryLedgerStore>) -> ConsistencyAuditor {
    ConsistencyAuditor::new(Arc::clone(store) as Arc<dyn LedgerStore>)
}

#[tokio::test]
async fn crediting_the_same_item_twice_applies_once() {
    let store = MemoryLedgerStore::new();
    let account_id = Uuid::new_v4();
    store.seed_account(account_id);

    let ledger = ledger_over(&store);
    let item = scored_item(account_id, 23);

    let first = ledger.credit_discovery(&item).await.unwrap();
    let second = ledger.credit_discovery(&item).await.unwrap();

    assert!(matches!(first, CreditOutcome::Credited(_)));
    assert!(matches!(second, CreditOutcome::AlreadyCredited));

    assert_eq!(ledger.balance(account_id).await.unwrap(), 23);
    assert_eq!(store.entries_for(account_id).len(), 1);
}

#[tokio::test]
async fn same_item_with_a_different_reason_is_a_separate_credit() {
    let store = MemoryLedgerStore::new();
    let account_id = Uuid::new_v4();
    store.seed_account(account_id);

    let ledger = ledger_over(&store);
    let item = scored_item(account_id, 10);

    ledger.credit_discovery(&item).await.unwrap();
    let bonus = ledger.credit(&item, "weekly-highlight").await.unwrap();

    assert!(matches!(bonus, CreditOutcome::Credited(_)));
    assert_eq!(ledger.balance(account_id).await.unwrap(), 20);
    assert_eq!(store.entries_for(account_id).len(), 2);
}

#[tokio::test]
async fn crediting_an_unknown_account_fails() {
    let store = MemoryLedgerStore::new();
    let ledger = ledger_over(&store);

    let missing = Uuid::new_v4();
    let err = ledger
        .credit_discovery(&scored_item(missing, 5))
        .await
        .unwrap_err();

    assert!(matches!(err, EngageError::AccountNotFound(id) if id == missing));
}

#[tokio::test]
async fn audit_reports_drift_and_repair_restores_the_invariant() {
    let store = MemoryLedgerStore::new();
    let account_id = Uuid::new_v4();
    store.seed_account(account_id);

    let ledger = ledger_over(&store);
    let auditor = auditor_over(&store);

    ledger
        .credit_discovery(&scored_item(account_id, 23))
        .await
        .unwrap();

    let clean = assert_ok!(auditor.verify_consistency(account_id).await);
    assert!(clean.is_consistent);
    assert_eq!(clean.difference, 0);

    // A crashed retry path bumped the balance without a ledger entry.
    store.tamper_balance(account_id, 30);

    let drifted = auditor.verify_consistency(account_id).await.unwrap();
    assert!(!drifted.is_consistent);
    assert_eq!(drifted.balance, 30);
    assert_eq!(drifted.ledger_sum, 23);
    assert_eq!(drifted.difference, 7);

    let outcome = auditor.repair(account_id).await.unwrap();
    match outcome {
        RepairOutcome::Repaired { delta, entry } => {
            assert_eq!(delta, -7, "ledger minus balance");
            assert_eq!(entry.amount, 0, "corrections never change the ledger sum");
            assert_eq!(entry.reason, "consistency-repair:-7");
        }
        RepairOutcome::NothingToRepair => panic!("drift should require a repair"),
    }

    let repaired = auditor.verify_consistency(account_id).await.unwrap();
    assert!(repaired.is_consistent);
    assert_eq!(repaired.balance, 23);

    // Repair is itself idempotent once the invariant holds.
    assert!(matches!(
        auditor.repair(account_id).await.unwrap(),
        RepairOutcome::NothingToRepair
    ));
}

#[tokio::test]
async fn sync_all_repairs_only_the_drifted_accounts() {
    let store = MemoryLedgerStore::new();
    let healthy = Uuid::new_v4();
    let drifted = Uuid::new_v4();
    store.seed_account(healthy);
    store.seed_account(drifted);

    let ledger = ledger_over(&store);
    let auditor = auditor_over(&store);

    ledger
        .credit_discovery(&scored_item(healthy, 10))
        .await
        .unwrap();
    ledger
        .credit_discovery(&scored_item(drifted, 10))
        .await
        .unwrap();
    store.tamper_balance(drifted, 4);

    let summary = auditor.sync_all().await.unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.repaired, 1);
    assert_eq!(summary.failed, 0);

    assert_eq!(store.balance(healthy).await.unwrap(), 10);
    assert_eq!(store.balance(drifted).await.unwrap(), 10);
    assert!(auditor
        .verify_consistency(drifted)
        .await
        .unwrap()
        .is_consistent);
    // The healthy account carries no correction entry.
    assert_eq!(store.entries_for(healthy).len(), 1);
    assert_eq!(store.entries_for(drifted).len(), 2);
}

#[tokio::test]
async fn zero_balance_accounts_are_outside_the_sync_scope() {
    let store = MemoryLedgerStore::new();
    let idle = Uuid::new_v4();
    store.seed_account(idle);

    let summary = auditor_over(&store).sync_all().await.unwrap();
    assert_eq!(summary.checked, 0);
    assert_eq!(summary.repaired, 0);
}
