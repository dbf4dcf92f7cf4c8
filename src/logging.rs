//! # Structured Logging Module
//!
//! Environment-aware structured logging for the pool, its workers and the
//! revival supervisor. Console output by default, JSON lines when
//! `WORKPOOL_LOG_JSON` is set. `RUST_LOG` overrides the environment's level.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));
        let json = std::env::var_os("WORKPOOL_LOG_JSON").is_some();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get log level based on environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

/// Log structured data for worker lifecycle transitions
pub fn log_worker_lifecycle(worker_id: usize, transition: &str, attempt: Option<u32>, details: Option<&str>) {
    tracing::info!(
        worker_id = worker_id,
        transition = %transition,
        attempt = attempt,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "👷 WORKER_LIFECYCLE"
    );
}

/// Log structured data for pool-level operations
pub fn log_pool_operation(operation: &str, workers: usize, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        workers = workers,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🏊 POOL_OPERATION"
    );
}

/// Log structured error data
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
