//! Tracing setup for hosts and the replay tool.

use crate::domain::settings::LogSettings;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the non-blocking file writer alive; drop it last to flush logs.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

fn rotation(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// `RUST_LOG` wins over the configured level.
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        let appender = RollingFileAppender::new(
            rotation(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging initialized (level {}, file logging {})",
        settings.level,
        if settings.file_logging_enabled { "on" } else { "off" }
    );

    Ok(LoggingGuard { _guards: guards })
}
