//! Logging initialization helpers
//!
//! The engine itself only emits `tracing` events; hosts embedding it can use
//! this helper to get a sensible env-filtered subscriber without wiring one
//! up themselves.

use tracing_subscriber::EnvFilter;

/// Initialize a global tracing subscriber filtered by `RUST_LOG`.
///
/// Falls back to `info` when `RUST_LOG` is unset. Safe to call more than
/// once; subsequent calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
