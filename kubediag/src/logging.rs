//! Diagnostic tracing for the diagnoser.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The findings
//! report and the JSON outcome go to stdout and are never routed through
//! tracing, so `RUST_LOG` cannot change product output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_directive` when unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=kubediag=debug kubediag run
/// ```
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
