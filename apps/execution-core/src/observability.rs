//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with an environment filter.
///
/// Respects `RUST_LOG`; defaults to `info`. Log lines go to stderr so
/// stdout stays a clean execution event stream.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
