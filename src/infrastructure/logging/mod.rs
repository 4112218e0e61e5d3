//! Logging setup via tracing-subscriber.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::domain::models::LoggingConfig;

/// Initialise the global subscriber from the logging configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set. When
/// a log directory is configured, output additionally rotates daily into
/// it; the returned guard must be held for the process lifetime or
/// buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    if let Some(directory) = &config.directory {
        let appender = tracing_appender::rolling::daily(directory, "argus.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if config.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
        }
        return Some(guard);
    }

    if config.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    None
}
