//! Process-wide error reporting and logging setup.
//!
//! Errors that cannot be returned to a caller (background export failures,
//! view conflicts, incompatible aggregations found while resolving an
//! instrument) are routed through [`handle_error`]. The default handler logs
//! through `tracing`; applications can install their own.

use crate::core::config::LoggingConfig;
use crate::core::{MetricsError, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

type ErrorHandler = Arc<dyn Fn(&MetricsError) + Send + Sync>;

static ERROR_HANDLER: Lazy<RwLock<Option<ErrorHandler>>> = Lazy::new(|| RwLock::new(None));

/// Installs a process-wide error handler, replacing any previous one
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&MetricsError) + Send + Sync + 'static,
{
    *ERROR_HANDLER.write() = Some(Arc::new(handler));
}

/// Restores the default `tracing` handler
pub fn reset_error_handler() {
    *ERROR_HANDLER.write() = None;
}

/// Reports an error that has no caller to return to
pub fn handle_error(err: MetricsError) {
    // Clone out of the lock so a handler may itself swap handlers.
    let handler = ERROR_HANDLER.read().clone();
    match handler {
        Some(handler) => handler(&err),
        None => log_error(&err),
    }
}

fn log_error(err: &MetricsError) {
    match err.category() {
        "conflict" | "configuration" => {
            tracing::warn!(category = err.category(), "{}", err);
        },
        _ => {
            tracing::error!(category = err.category(), "{}", err);
        },
    }
}

/// Initialize logging based on configuration.
///
/// `METERLINE_LOG` (or `RUST_LOG`) overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("METERLINE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let fmt_layer = if config.structured {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).compact()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| MetricsError::config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}
