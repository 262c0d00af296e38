//! Logging initialization.
//!
//! `RUST_LOG` controls verbosity (default `warn`); events go to stderr in
//! compact form so report output on stdout stays machine-consumable.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Call once from `main`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
