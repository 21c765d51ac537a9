use thiserror::Error;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Log target of the height negotiation channel.
pub const HEIGHT_TARGET: &str = "solar_optly::height";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{value}'")]
    Filter {
        value: String,
        #[source]
        source: ParseError,
    },
    #[error("height channel level '{value}' is not a log level")]
    HeightLevel {
        value: String,
        #[source]
        source: ParseError,
    },
    #[error("subscriber already installed: {0}")]
    Subscriber(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// `RUST_LOG` wins over `APP_LOG_LEVEL`; the height channel level is layered on either.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| {
            TelemetryError::Filter {
                value: config.log_level.clone(),
                source,
            }
        })?,
    };

    match config.height_log_level.as_deref() {
        Some(level) => Ok(filter.add_directive(height_directive(level)?)),
        None => Ok(filter),
    }
}

fn height_directive(level: &str) -> Result<Directive, TelemetryError> {
    format!("{HEIGHT_TARGET}={}", level.trim())
        .parse()
        .map_err(|source| TelemetryError::HeightLevel {
            value: level.to_string(),
            source,
        })
}

pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(config)?)
        .with_target(true)
        .compact()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(log_level: &str, height: Option<&str>) -> TelemetryConfig {
        TelemetryConfig {
            log_level: log_level.to_string(),
            height_log_level: height.map(str::to_string),
        }
    }

    #[test]
    fn height_channel_directive_targets_the_height_log() {
        let directive = height_directive(" debug ").expect("debug is a level");
        assert_eq!(directive.to_string(), "solar_optly::height=debug");
    }

    #[test]
    fn unknown_height_level_is_rejected() {
        let err = height_directive("loud").expect_err("not a level");
        assert!(matches!(err, TelemetryError::HeightLevel { .. }));
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn malformed_base_filter_is_reported_with_its_value() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = build_filter(&config("info,solar_optly=chatty", None))
            .expect_err("filter must not parse");
        assert!(
            matches!(err, TelemetryError::Filter { ref value, .. } if value == "info,solar_optly=chatty")
        );
    }
}
