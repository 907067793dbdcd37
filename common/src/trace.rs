//! Sets up structured logging for sandkube binaries

use tracing_subscriber::{EnvFilter, fmt};

/// Initializes a stdout `tracing` subscriber filtered by the configured log level
///
/// Honors `RUST_LOG` if set, otherwise falls back to the level from [`crate::Conf`].
///
/// # Arguments
///
/// * `service` - The name of the binary initializing tracing, included on every span
/// * `level` - The default filter directive to use when `RUST_LOG` is unset
pub fn setup(service: &str, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .init();
    tracing::info!(service, "tracing initialized");
}
