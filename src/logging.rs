//! Tracing setup: a non-blocking rolling file appender plus an optional
//! stdout layer, driven by `config::LoggingConfig`.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initializes the global tracing subscriber. The returned `WorkerGuard`
/// must be held for the process lifetime - dropping it stops the
/// non-blocking writer from flushing.
pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let dir = config.dir.as_deref().unwrap_or(".");
    let file_appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}
