use std::time::Duration;

use crmsync_domain::{CrmSyncError, LoggingConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.filter`. An invalid directive falls back to
/// `info`. Calling this twice is harmless; the second install is ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Log the outcome of an HTTP route with structured fields.
///
/// `route` should be the route template, never the concrete path, so
/// workspace ids stay out of the label.
#[inline]
pub fn log_route_outcome(route: &str, elapsed: Duration, status: u16) {
    let duration_ms = elapsed.as_millis() as u64;

    if status < 400 {
        info!(route, status, duration_ms, "route_completed");
    } else {
        warn!(route, status, duration_ms, "route_failed");
    }
}

/// Convert a `CrmSyncError` into a stable label suitable for logging.
#[inline]
pub fn error_label(error: &CrmSyncError) -> &'static str {
    match error {
        CrmSyncError::Database(_) => "database",
        CrmSyncError::Config(_) => "config",
        CrmSyncError::Network(_) => "network",
        CrmSyncError::Auth(_) => "auth",
        CrmSyncError::NotFound(_) => "not_found",
        CrmSyncError::InvalidInput(_) => "invalid_input",
        CrmSyncError::Internal(_) => "internal",
    }
}
