//! Tracing initialization for embedding hosts.
//!
//! The library itself only emits `tracing` spans and `log` records;
//! hosts decide where they go. This helper wires a sensible default:
//! an env-filtered fmt subscriber with the `log` bridge installed.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber filtered by `RUST_LOG` (falling
/// back to `default_filter`) and bridges `log` records into tracing.
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
