//! Structured logging initialization.
//!
//! The RUST_LOG environment variable takes precedence over configuration file settings.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter for the configured level, unless RUST_LOG is set.
fn filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(config.level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize the logging subsystem.
///
/// Logs go to stderr so the console keeps stdout for its own output.
pub fn init(config: &LoggingConfig) {
    let filter = filter(config);
    let registry = tracing_subscriber::registry().with(filter);
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.target)
        .with_thread_names(config.thread_names);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => registry.with(base.with_ansi(true)).init(),
        (LogFormat::Pretty, false) => registry.with(base.with_ansi(true).without_time()).init(),
        (LogFormat::Json, true) => registry.with(base.json()).init(),
        (LogFormat::Json, false) => registry.with(base.json().without_time()).init(),
        (LogFormat::Compact, true) => registry.with(base.compact().with_ansi(true)).init(),
        (LogFormat::Compact, false) => registry
            .with(base.compact().with_ansi(true).without_time())
            .init(),
    }
}
