// Logging module - tracing subscriber setup
//
// Logs always go to stdout in the human-readable format. With file logging
// enabled, a second layer writes JSON lines to a rotating file through a
// non-blocking writer. Every log line emitted while a request is in flight
// carries the session span (id, method, path, client fingerprint).

use crate::config::{LogRotation, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter directive for a configured level
///
/// A bare level applies to this crate only; anything containing `=` or `,`
/// is taken as a full directive.
pub fn filter_directive(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("reasoning_relay={}", level)
    }
}

/// Install the global subscriber
///
/// Precedence: RUST_LOG env var > config file > default "info".
/// The returned guard must be kept alive for the duration of the program so
/// buffered file logs are flushed on exit.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter_directive(&config.level).into());

    let stdout = tracing_subscriber::fmt::layer().with_target(false);

    let (file_layer, guard) = match file_writer(config) {
        Some((writer, guard)) => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file_layer)
        .init();

    guard
}

/// Rolling file writer, or `None` when file logging is off or unusable
fn file_writer(
    config: &LoggingConfig,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if !config.file_enabled {
        return None;
    }

    // The subscriber is not installed yet, so this can only go to stderr
    if let Err(e) = std::fs::create_dir_all(&config.file_dir) {
        eprintln!(
            "Warning: Could not create log directory {:?}: {}",
            config.file_dir, e
        );
        return None;
    }

    let appender = match config.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Daily => tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(&config.file_dir, &config.file_prefix),
    };

    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scoped_to_crate() {
        assert_eq!(filter_directive("debug"), "reasoning_relay=debug");
    }

    #[test]
    fn test_full_directive_kept() {
        assert_eq!(
            filter_directive("reasoning_relay=trace,hyper=warn"),
            "reasoning_relay=trace,hyper=warn"
        );
        assert_eq!(filter_directive("info,axum=debug"), "info,axum=debug");
    }

    #[test]
    fn test_file_writer_disabled() {
        let config = LoggingConfig::default();
        assert!(file_writer(&config).is_none());
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file_enabled: true,
            file_dir: dir.path().join("nested"),
            file_rotation: LogRotation::Never,
            ..LoggingConfig::default()
        };

        let writer = file_writer(&config);
        assert!(writer.is_some());
        assert!(dir.path().join("nested").is_dir());
    }
}
