//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogFormat;

const LOG_FILE_PREFIX: &str = "visualize.log";

/// Build the filter: `RUST_LOG` if set, else `level` for this crate and `warn` elsewhere.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,vulcan_visualize={}", level.to_lowercase())))
}

/// Install the global subscriber. Logs go to stderr, and also to a
/// daily-rolling file when `dir` is given.
///
/// Keep the returned guard alive for the life of the process or buffered
/// file output is lost.
pub fn init(level: &str, format: LogFormat, dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_writer, guard) = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json = format == LogFormat::Json;
    let console_text = (!json).then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let console_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let file_layer = file_writer.map(|writer| fmt::layer().json().with_writer(writer).with_ansi(false));

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_configured_level() {
        let filter = env_filter("DEBUG");
        assert!(filter.to_string().contains("debug") || std::env::var("RUST_LOG").is_ok());
    }
}
