//! Shared test doubles: in-memory stores mirroring the Postgres constraints
//! and a scripted source for driving the router.

#![allow(dead_code)] // not every test binary uses every helper

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use engage_core::config::EngageConfig;
use engage_core::error::{EngageError, Result};
use engage_core::ledger::PointsLedger;
use engage_core::models::ledger_entry::NewLedgerEntry;
use engage_core::models::{Account, Item, LedgerEntry, MonitoringState, NewItem};
use engage_core::cache::TieredCache;
use engage_core::queue::RateLimitedQueue;
use engage_core::resilience::CircuitBreakerManager;
use engage_core::router::SourceHealthRouter;
use engage_core::sources::{
    AccountRef, DiscoveredItem, EngagementCounts, ItemRef, ItemSource, SourceError, SourceKind,
    SourceRegistry,
};
use engage_core::store::{CreditOutcome, EngagementStore, LedgerStore, RepairOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringRecord {
    pub items_found: i64,
    pub state: &'static str,
    pub last_error: Option<String>,
}

/// In-memory [`EngagementStore`] enforcing the same uniqueness rules as the
/// Postgres schema.
#[derive(Default)]
pub struct MemoryEngagementStore {
    pub accounts: Mutex<HashMap<Uuid, Account>>,
    pub items: Mutex<Vec<Item>>,
    pub monitoring: Mutex<HashMap<Uuid, MonitoringRecord>>,
}

impl MemoryEngagementStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_account(&self, account: Account) {
        self.accounts.lock().insert(account.id, account);
    }

    pub fn seed_item(&self, item: Item) {
        self.items.lock().push(item);
    }

    pub fn monitoring_for(&self, account_id: Uuid) -> Option<MonitoringRecord> {
        self.monitoring.lock().get(&account_id).cloned()
    }

    pub fn item_by_id(&self, item_id: Uuid) -> Option<Item> {
        self.items.lock().iter().find(|i| i.id == item_id).cloned()
    }
}

#[async_trait]
impl EngagementStore for MemoryEngagementStore {
    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.lock().get(&account_id).cloned())
    }

    async fn find_item(&self, item_id: Uuid) -> Result<Option<Item>> {
        Ok(self.item_by_id(item_id))
    }

    async fn create_item_if_new(&self, new_item: NewItem) -> Result<Option<Item>> {
        let mut items = self.items.lock();
        if items
            .iter()
            .any(|i| i.canonical_url == new_item.canonical_url)
        {
            return Ok(None);
        }

        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            external_id: new_item.external_id,
            canonical_url: new_item.canonical_url,
            account_id: new_item.account_id,
            likes: new_item.counts.likes,
            reposts: new_item.counts.reposts,
            replies: new_item.counts.replies,
            quotes: new_item.counts.quotes,
            views: new_item.counts.views,
            bookmarks: new_item.counts.bookmarks,
            base_score: new_item.base_score,
            bonus_score: new_item.bonus_score,
            total_score: new_item.base_score + new_item.bonus_score,
            discovered_at: now,
            metrics_refreshed_at: None,
            discovery_method: new_item.discovery_method,
            created_at: now,
            updated_at: now,
        };
        items.push(item.clone());
        Ok(Some(item))
    }

    async fn update_item_engagement(
        &self,
        item_id: Uuid,
        counts: &EngagementCounts,
        bonus_score: i64,
    ) -> Result<Option<Item>> {
        let mut items = self.items.lock();
        let Some(item) = items.iter_mut().find(|i| i.id == item_id) else {
            return Ok(None);
        };

        item.likes = counts.likes;
        item.reposts = counts.reposts;
        item.replies = counts.replies;
        item.quotes = counts.quotes;
        item.views = counts.views;
        item.bookmarks = counts.bookmarks;
        item.bonus_score = bonus_score;
        item.total_score = item.base_score + bonus_score;
        item.metrics_refreshed_at = Some(Utc::now());
        item.updated_at = Utc::now();

        Ok(Some(item.clone()))
    }

    async fn recent_external_ids(&self, account_id: Uuid, limit: i64) -> Result<Vec<String>> {
        let items = self.items.lock();
        let mut owned: Vec<&Item> = items.iter().filter(|i| i.account_id == account_id).collect();
        owned.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at));
        Ok(owned
            .into_iter()
            .take(limit as usize)
            .map(|i| i.external_id.clone())
            .collect())
    }

    async fn record_monitoring(
        &self,
        account_id: Uuid,
        new_items: i64,
        state: MonitoringState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut monitoring = self.monitoring.lock();
        let record = monitoring.entry(account_id).or_insert(MonitoringRecord {
            items_found: 0,
            state: "active",
            last_error: None,
        });
        record.items_found += new_items;
        record.state = state.as_str();
        record.last_error = last_error.map(str::to_string);
        Ok(())
    }

    async fn touch_account_checked(&self, account_id: Uuid) -> Result<()> {
        if let Some(account) = self.accounts.lock().get_mut(&account_id) {
            account.last_checked_at = Some(Utc::now());
            account.check_count += 1;
        }
        Ok(())
    }
}

/// In-memory [`LedgerStore`] mirroring the partial unique index on
/// (item_id, reason).
#[derive(Default)]
pub struct MemoryLedgerStore {
    pub balances: Mutex<HashMap<Uuid, i64>>,
    pub entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_account(&self, account_id: Uuid) {
        self.balances.lock().insert(account_id, 0);
    }

    /// Simulate drift from a partial failure by writing the cached balance
    /// directly, bypassing the ledger.
    pub fn tamper_balance(&self, account_id: Uuid, balance: i64) {
        self.balances.lock().insert(account_id, balance);
    }

    pub fn entries_for(&self, account_id: Uuid) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn credit_if_absent(&self, new_entry: NewLedgerEntry) -> Result<CreditOutcome> {
        let mut balances = self.balances.lock();
        let Some(balance) = balances.get_mut(&new_entry.account_id) else {
            return Err(EngageError::AccountNotFound(new_entry.account_id));
        };

        let mut entries = self.entries.lock();
        if let Some(item_id) = new_entry.item_id {
            let duplicate = entries
                .iter()
                .any(|e| e.item_id == Some(item_id) && e.reason == new_entry.reason);
            if duplicate {
                return Ok(CreditOutcome::AlreadyCredited);
            }
        }

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            account_id: new_entry.account_id,
            amount: new_entry.amount,
            reason: new_entry.reason,
            item_id: new_entry.item_id,
            created_at: Utc::now(),
        };
        entries.push(entry.clone());
        *balance += entry.amount;

        Ok(CreditOutcome::Credited(entry))
    }

    async fn balance(&self, account_id: Uuid) -> Result<i64> {
        self.balances
            .lock()
            .get(&account_id)
            .copied()
            .ok_or(EngageError::AccountNotFound(account_id))
    }

    async fn ledger_sum(&self, account_id: Uuid) -> Result<i64> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.account_id == account_id)
            .map(|e| e.amount)
            .sum())
    }

    async fn item_score_sum(&self, _account_id: Uuid) -> Result<i64> {
        // Item scores live in the engagement store; the auditor treats this
        // as informational only.
        Ok(0)
    }

    async fn repair_balance(&self, account_id: Uuid) -> Result<RepairOutcome> {
        let ledger_sum = self.ledger_sum(account_id).await?;

        let mut balances = self.balances.lock();
        let Some(balance) = balances.get_mut(&account_id) else {
            return Err(EngageError::AccountNotFound(account_id));
        };

        let delta = ledger_sum - *balance;
        if delta == 0 {
            return Ok(RepairOutcome::NothingToRepair);
        }
        *balance = ledger_sum;

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            account_id,
            amount: 0,
            reason: format!("consistency-repair:{delta:+}"),
            item_id: None,
            created_at: Utc::now(),
        };
        self.entries.lock().push(entry.clone());

        Ok(RepairOutcome::Repaired { delta, entry })
    }

    async fn accounts_with_nonzero_balance(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .balances
            .lock()
            .iter()
            .filter(|(_, balance)| **balance != 0)
            .map(|(id, _)| *id)
            .collect())
    }
}

type FetchResult = std::result::Result<EngagementCounts, SourceError>;
type DiscoverResult = std::result::Result<Vec<DiscoveredItem>, SourceError>;

/// Source whose responses are scripted per call, with a fallback default.
pub struct ScriptedSource {
    name: String,
    kind: SourceKind,
    fetch_script: Mutex<VecDeque<FetchResult>>,
    discover_script: Mutex<VecDeque<DiscoverResult>>,
    default_fetch: Mutex<Option<FetchResult>>,
    default_discover: Mutex<Option<DiscoverResult>>,
    pub fetch_calls: AtomicUsize,
    pub discover_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: &str, kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            fetch_script: Mutex::new(VecDeque::new()),
            discover_script: Mutex::new(VecDeque::new()),
            default_fetch: Mutex::new(None),
            default_discover: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
        })
    }

    pub fn push_fetch(self: &Arc<Self>, result: FetchResult) -> Arc<Self> {
        self.fetch_script.lock().push_back(result);
        Arc::clone(self)
    }

    pub fn push_discover(self: &Arc<Self>, result: DiscoverResult) -> Arc<Self> {
        self.discover_script.lock().push_back(result);
        Arc::clone(self)
    }

    pub fn default_fetch(self: &Arc<Self>, result: FetchResult) -> Arc<Self> {
        *self.default_fetch.lock() = Some(result);
        Arc::clone(self)
    }

    pub fn default_discover(self: &Arc<Self>, result: DiscoverResult) -> Arc<Self> {
        *self.default_discover.lock() = Some(result);
        Arc::clone(self)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn discovers(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_engagement(&self, _item: &ItemRef) -> FetchResult {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.fetch_script.lock().pop_front() {
            return result;
        }
        self.default_fetch
            .lock()
            .clone()
            .unwrap_or_else(|| Err(SourceError::Transient("script exhausted".into())))
    }

    async fn discover(&self, _account: &AccountRef) -> DiscoverResult {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.discover_script.lock().pop_front() {
            return result;
        }
        self.default_discover
            .lock()
            .clone()
            .unwrap_or_else(|| Err(SourceError::Transient("script exhausted".into())))
    }
}

/// Fully wired router over memory stores, plus handles to everything a test
/// needs to assert against.
pub struct TestHarness {
    pub router: Arc<SourceHealthRouter>,
    pub store: Arc<MemoryEngagementStore>,
    pub ledger_store: Arc<MemoryLedgerStore>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub queue: Arc<RateLimitedQueue>,
    pub account: AccountRef,
}

pub fn make_account() -> Account {
    let now = Utc::now();
    Account {
        id: Uuid::new_v4(),
        external_id: "1234567890".to_string(),
        username: "tester".to_string(),
        balance: 0,
        monitoring_enabled: true,
        last_checked_at: None,
        check_count: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn discovered(external_id: &str, url: &str, counts: EngagementCounts) -> DiscoveredItem {
    DiscoveredItem {
        external_id: external_id.to_string(),
        canonical_url: url.to_string(),
        counts,
    }
}

pub fn build_harness(sources: Vec<Arc<dyn ItemSource>>) -> TestHarness {
    build_harness_with_config(sources, EngageConfig::for_test())
}

pub fn build_harness_with_config(
    sources: Vec<Arc<dyn ItemSource>>,
    config: EngageConfig,
) -> TestHarness {
    let store = MemoryEngagementStore::new();
    let ledger_store = MemoryLedgerStore::new();
    let breakers = Arc::new(CircuitBreakerManager::new(config.breaker.clone(), None));
    let queue = Arc::new(RateLimitedQueue::new(config.queue.clone()));
    let cache = Arc::new(TieredCache::new(config.cache.clone(), None));
    let ledger = Arc::new(PointsLedger::new(
        ledger_store.clone() as Arc<dyn LedgerStore>,
        config.scoring.clone(),
    ));

    let account = make_account();
    let account_ref = account.source_ref();
    store.seed_account(account);
    ledger_store.seed_account(account_ref.account_id);

    let registry = SourceRegistry::new(sources, &config.sources);
    let router = Arc::new(SourceHealthRouter::new(
        registry,
        Arc::clone(&breakers),
        Arc::clone(&queue),
        cache,
        store.clone() as Arc<dyn EngagementStore>,
        ledger,
        &config,
    ));

    TestHarness {
        router,
        store,
        ledger_store,
        breakers,
        queue,
        account: account_ref,
    }
}
