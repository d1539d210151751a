use crate::domain::settings::LogSettings;
use std::path::Path;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Holds the file writer's worker; dropping it flushes buffered lines
pub struct LoggingGuard {
    _file_writer: Option<WorkerGuard>,
}

fn rotation_from(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// `RUST_LOG` wins over the configured level; an unparseable level means `info`
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// A fmt layer writing to `writer`, with the source/thread/target columns the
/// settings ask for
fn formatted<S, W>(settings: &LogSettings, writer: W) -> fmt::Layer<S, DefaultFields, Format, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_file(settings.show_file_line)
        .with_line_number(settings.show_file_line)
        .with_thread_ids(settings.show_thread_ids)
        .with_target(settings.show_target)
}

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let console_layer = settings
        .console_logging_enabled
        .then(|| formatted(settings, std::io::stdout).with_ansi(settings.ansi_colors));

    let mut file_writer = None;
    let file_layer = if settings.file_logging_enabled {
        let appender = RollingFileAppender::new(
            rotation_from(&settings.rotation),
            Path::new(&settings.log_dir),
            &settings.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_writer = Some(guard);
        Some(formatted(settings, writer).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!(
        level = %settings.level,
        file = settings.file_logging_enabled,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_writer: file_writer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation_from("Hourly"), Rotation::HOURLY);
        assert_eq!(rotation_from("never"), Rotation::NEVER);
        assert_eq!(rotation_from("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_level_filter_accepts_directives() {
        let filter = level_filter("bluetooth_central=debug,warn").to_string();
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(filter.contains("bluetooth_central=debug"));
            assert!(filter.contains("warn"));
        }
    }

    #[test]
    fn test_second_install_is_rejected() {
        let settings = LogSettings {
            console_logging_enabled: false,
            file_logging_enabled: false,
            ..Default::default()
        };
        let _guard = init_logger(&settings).unwrap();
        assert!(init_logger(&settings).is_err());
    }
}
