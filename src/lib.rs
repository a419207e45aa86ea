#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Engage Core
//!
//! Engagement acquisition and consistency core for a community-engagement
//! platform: obtains engagement data (likes, reposts, replies, ...) from
//! multiple unreliable upstream sources, avoids hammering them, caches
//! results across two tiers, and keeps a derived points ledger consistent
//! with its source-of-truth history despite partial failures and retries.
//!
//! ## Architecture
//!
//! - [`cache`] - bounded in-process L1 over a durable Postgres L2
//! - [`resilience`] - per-source circuit breakers with persisted state
//! - [`queue`] - rate-limited per-source request serialization
//! - [`sources`] - the upstream source trait and normalized shapes
//! - [`router`] - fallback orchestration across sources
//! - [`ledger`] - idempotent crediting, scoring, and the consistency auditor
//! - [`models`] - SQLx data layer for the entities this core owns
//! - [`store`] - storage traits so tests run without a database
//! - [`core`] - explicit service wiring for process startup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use engage_core::config::EngageConfig;
//! use engage_core::core::EngageCore;
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! engage_core::logging::init_structured_logging();
//!
//! let config = EngageConfig::from_env()?;
//! let core = EngageCore::new(pool, config, vec![/* registered sources */]);
//!
//! for health in core.source_health().await {
//!     println!("{}: {:?}", health.source, health.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod queue;
pub mod resilience;
pub mod router;
pub mod sources;
pub mod store;

pub use config::EngageConfig;
pub use core::EngageCore;
pub use error::{EngageError, Result};
pub use ledger::{ConsistencyReport, PointsLedger, ScoreBreakdown};
pub use resilience::{BreakerMetrics, CircuitBreakerManager, CircuitState};
pub use router::{DiscoveryResult, OperationFailure, SourceHealthRouter};
pub use sources::{
    AccountRef, DiscoveredItem, EngagementCounts, EngagementResult, ItemRef, ItemSource,
    SourceError, SourceKind, SourceRegistry,
};
pub use store::{CreditOutcome, EngagementStore, LedgerStore, RepairOutcome};
