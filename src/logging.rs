//! # Structured Logging
//!
//! Environment-aware structured logging for the acquisition core. Console
//! output only; log shipping is the deployment's concern.

use std::env;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults.
///
/// Safe to call more than once; later calls are no-ops. If an embedding
/// process already installed a global subscriber, this keeps it.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let default_level = default_log_level(&environment);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        } else {
            tracing::info!(environment = %environment, "structured logging initialized");
        }
    });
}

fn get_environment() -> String {
    env::var("ENGAGE_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}
