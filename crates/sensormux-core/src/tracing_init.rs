//! Shared tracing/logging initialization.
//!
//! Embedders of the sensor multiplexer use the same pattern for setting up
//! `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"sensormux_session=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let _ = try_init_tracing(default_filter, log_json);
}

/// Like [`init_tracing`] but reports whether this call installed the
/// subscriber.
pub fn try_init_tracing(
    default_filter: &str,
    log_json: bool,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    }
}

/// Initialise tracing from the `logging` section of the configuration.
pub fn init_from_config(logging: &LoggingConfig) {
    init_tracing(&logging.level, logging.json);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected_not_panicking() {
        let _ = try_init_tracing("sensormux_core=debug", false);
        let second = try_init_tracing("sensormux_core=debug", true);
        assert!(second.is_err());
        init_from_config(&LoggingConfig::default());
    }
}
