//! Crate-level error types.
//!
//! Component-specific errors (`SourceError`, `CacheError`, `QueueError`) live
//! with their components; this is the umbrella type for persistence-facing
//! operations such as the ledger and the stores.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, EngageError>;
