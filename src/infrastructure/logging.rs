//! Tracing subscriber setup.

use thiserror::Error;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::config::LoaderConfig;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum LoggingError {
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Installs a global subscriber filtered by `RUST_LOG`, falling back to the
/// configured level. Logs go to `config.log_path` when set, stderr otherwise.
///
/// # Errors
/// Returns [`LoggingError`] if the log file cannot be opened or a subscriber
/// is already installed.
pub fn init_logging(config: &LoaderConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_init_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let temp = TempDir::new()?;
        let config = LoaderConfig {
            log_path: Some(temp.path().join("logs").join("pixfetch.log")),
            ..LoaderConfig::default()
        };

        // Another test may already own the global subscriber; either way the
        // second call in this test must fail.
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::AlreadyInitialized)
        ));
        Ok(())
    }
}
