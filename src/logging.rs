//! Diagnostic logging
//!
//! Installs a `tracing` subscriber on stderr. `RUST_LOG` wins when set;
//! otherwise the level requested by the CLI applies to this crate only.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Repeated calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dlc_table={}", level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
