//! Diagnostic logging setup.
//!
//! Logs go to stderr through `tracing-subscriber`. `RUST_LOG`, when set,
//! takes precedence over the configured `log_level`.

use tracing_subscriber::EnvFilter;

/// Filter for `log_level`, unless `RUST_LOG` is set and parses.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
