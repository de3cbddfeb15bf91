//! Logging initialization for app hosts and tests

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with env-filter support.
///
/// Honors `RUST_LOG`; falls back to `info` (or `debug` when requested).
/// Safe to call once per process; app hosts call this before constructing
/// the presence registry and dispatcher.
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}
