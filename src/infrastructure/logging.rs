use crate::domain::settings::{LogRotation, LogSettings};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Must stay alive for buffered file logs to be flushed
    _guards: Vec<WorkerGuard>,
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

/// Relative log directories live under the per-user data directory
fn resolve_log_dir(log_dir: &str) -> PathBuf {
    let dir = PathBuf::from(log_dir);
    if dir.is_absolute() {
        return dir;
    }
    dirs::data_local_dir()
        .map(|base| base.join("PhotoPin").join(&dir))
        .unwrap_or(dir)
}

/// `RUST_LOG` wins, then the command line override, then the settings file
fn level_filter(settings: &LogSettings, level_override: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level_override.unwrap_or(&settings.level)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logger(
    settings: &LogSettings,
    level_override: Option<&str>,
) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // Console output goes to stderr; stdout carries camera events
    let console_layer = settings.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_file(settings.source_locations)
            .with_line_number(settings.source_locations)
    });

    let file_layer = match &settings.file {
        Some(file) => {
            let log_dir = resolve_log_dir(&file.dir);
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = tracing_appender::rolling::RollingFileAppender::new(
                rotation(file.rotation),
                &log_dir,
                &file.prefix,
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_file(settings.source_locations)
                    .with_line_number(settings.source_locations),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(level_filter(settings, level_override))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!("Logging initialized");

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_maps_to_appender() {
        assert_eq!(rotation(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(rotation(LogRotation::Never), Rotation::NEVER);
        assert_eq!(rotation(LogRotation::default()), Rotation::DAILY);
    }

    #[test]
    fn cli_level_beats_settings() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let settings = LogSettings::default();
        assert_eq!(level_filter(&settings, Some("debug")).to_string(), "debug");
        assert_eq!(level_filter(&settings, None).to_string(), "info");
    }

    #[test]
    fn absolute_log_dir_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        assert_eq!(resolve_log_dir(path), dir.path());
        assert!(resolve_log_dir("logs").ends_with("logs"));
    }
}
