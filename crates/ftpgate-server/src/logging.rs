//! Tracing subscriber setup.
//!
//! Always logs to stderr. With a log directory, also writes `combined.log`
//! (everything that passes the filter) and `error.log` (ERROR only) through
//! non-blocking appenders.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::constants::{COMBINED_LOG_FILE, ERROR_LOG_FILE};

/// Flushes the file appenders when dropped. Hold it for the process lifetime.
#[must_use]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = Vec::new();
    let file_layers = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;

            let (combined, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, COMBINED_LOG_FILE));
            guards.push(guard);
            let (errors, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, ERROR_LOG_FILE));
            guards.push(guard);

            Some(
                fmt::layer()
                    .with_writer(combined)
                    .with_ansi(false)
                    .and_then(
                        fmt::layer()
                            .with_writer(errors)
                            .with_ansi(false)
                            .with_filter(LevelFilter::ERROR),
                    ),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layers)
        .try_init()?;

    if let Some(dir) = log_dir {
        tracing::info!("logging to {}", dir.display());
    }

    Ok(LogGuard { _guards: guards })
}
