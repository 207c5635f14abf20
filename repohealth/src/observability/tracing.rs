//! Tracing subscriber setup and span timing.

use crate::config::{ConfigError, LogConfig, LogFormat};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber configured from `config`.
///
/// `RUST_LOG` is ignored; the filter comes from [`LogConfig::level`].
/// Installing twice is not an error: the second call leaves the first
/// subscriber in place and returns `Ok(false)`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the filter directive cannot be parsed.
pub fn init_tracing(config: &LogConfig) -> Result<bool, ConfigError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|err| ConfigError::Invalid {
        field: "log.level",
        message: err.to_string(),
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().with_current_span(false).try_init().is_ok(),
    };
    Ok(installed)
}

/// Measures the wall-clock duration of a stage or job.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the timer and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
