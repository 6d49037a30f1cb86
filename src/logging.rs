//! Logging initialization for the hublink binary.
//!
//! Configures the `tracing` subscriber with level filtering via the
//! `HUBLINK_LOG` environment variable. When it is unset or invalid, the level
//! from the `[logging]` config section is used.
//!
//! # Usage
//!
//! ```bash
//! # Level from config (info by default)
//! hublink watch
//!
//! # Debug level, including every resync
//! HUBLINK_LOG=debug hublink watch
//!
//! # Module-specific filtering
//! HUBLINK_LOG=hublink::client::resync=debug,warn hublink watch
//! ```

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::schema::LogLevel;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "HUBLINK_LOG";

/// Builds the filter from `HUBLINK_LOG`, falling back to `fallback`.
pub fn filter(fallback: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback.as_directive()))
}

/// Initialize the tracing subscriber.
///
/// Output goes to stderr so stdout stays clean for snapshot output.
/// A second call is a no-op.
pub fn init(fallback: LogLevel) {
    let _ = fmt()
        .with_env_filter(filter(fallback))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
