//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the default `info` filter (overridable via
/// `RUST_LOG`). JSON events with timestamps.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default_filter("info");
}

/// Initialize tracing with an explicit fallback filter for when `RUST_LOG`
/// is unset. Operator tooling uses `warn` to keep command output readable.
pub fn init_with_default_filter(fallback: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
