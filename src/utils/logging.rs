//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log file name inside `log_dir`.
pub const LOG_FILE_NAME: &str = "btk-selection.log";

/// Filter from `RUST_LOG`, falling back to `level` for the BTK crates.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "btk_selection={level},btk_selection_core={level},btk_selection_backends={level},warn"
        ))
    })
}

fn console_layer(format: &str) -> BoxedLayer {
    match format {
        "json" => tracing_subscriber::fmt::layer().json().boxed(),
        "compact" => tracing_subscriber::fmt::layer().compact().boxed(),
        _ => tracing_subscriber::fmt::layer().pretty().boxed(),
    }
}

fn file_layer(format: &str, appender: RollingFileAppender) -> BoxedLayer {
    match format {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(appender)
            .with_ansi(false)
            .boxed(),
        "compact" => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(appender)
            .with_ansi(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .boxed(),
    }
}

/// Install the global subscriber.
///
/// Logs go to stdout in the configured format and, when `log_dir` is set,
/// also to [`LOG_FILE_NAME`] in that directory without ANSI colours.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(&config.format)];

    if let Some(dir) = &config.log_dir {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE_NAME)
            .build(dir)
            .context(format!("Failed to open log file in {}", dir.display()))?;
        layers.push(file_layer(&config.format, appender));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(&config.level))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(dir) = &config.log_dir {
        info!("Logging to file: {}", dir.join(LOG_FILE_NAME).display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "compact".to_string(),
            log_dir: Some(dir.path().to_path_buf()),
        };

        init_logging(&config).unwrap();
        assert!(dir.path().join(LOG_FILE_NAME).exists());

        // Only one global subscriber can be installed.
        assert!(init_logging(&LoggingConfig::default()).is_err());
    }
}
