//! Tracing setup for the CLI.
//!
//! Decisions are logged at `info`, soft failures at `warn`, and command
//! plumbing at `debug`. Output goes to stderr so stdout stays the run report.
//! Session transcripts are written separately under `.planning/logs/`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "conductor=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `conductor=info`, or `conductor=debug` when
/// `verbose` is set.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor --milestone v1.0 --dry-run
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "conductor=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
