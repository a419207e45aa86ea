//! # Models
//!
//! Data layer for the entities the acquisition core touches. Each model is a
//! `FromRow` struct with a `New*` companion and `&PgPool` methods using
//! runtime-checked queries.

pub mod account;
pub mod breaker_state;
pub mod item;
pub mod ledger_entry;
pub mod monitoring_status;

pub use account::{Account, NewAccount};
pub use breaker_state::BreakerStateRow;
pub use item::{Item, NewItem};
pub use ledger_entry::{LedgerEntry, NewLedgerEntry};
pub use monitoring_status::{MonitoringState, MonitoringStatus};
