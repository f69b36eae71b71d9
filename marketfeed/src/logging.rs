use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the process-wide subscriber once. Level defaults to `info`, overridable per
/// module via `RUST_LOG` (e.g. `RUST_LOG=marketfeed_core::reconnect=debug`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
