use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::eligibility::RuleSet;
use crate::protocol::OriginPolicy;

const DEFAULT_APP_URL: &str = "https://solar-form-optly-def.vercel.app/loader";

/// Distinguishes runtime behavior for different stages of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Log level used when `APP_LOG_LEVEL` is unset.
    pub fn default_log_level(self) -> &'static str {
        match self {
            Self::Development => "info",
            Self::Test | Self::Production => "warn",
        }
    }
}

/// Top-level configuration for the CLI and simulation tooling.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub controller: ControllerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );
        let log_level = env::var("APP_LOG_LEVEL")
            .unwrap_or_else(|_| environment.default_log_level().to_string());
        let height_log_level = env::var("SOLAR_OPTLY_HEIGHT_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let mut controller = ControllerConfig::default();
        controller.apply_env()?;

        Ok(Self {
            environment,
            telemetry: TelemetryConfig {
                log_level,
                height_log_level,
            },
            controller,
        })
    }

    /// Replace the controller settings with a JSON document, keeping env overrides on top.
    pub fn with_controller_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut controller: ControllerConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        controller.apply_env()?;
        self.controller = controller;
        Ok(self)
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Separate level for the height negotiation channel, e.g. `debug`.
    pub height_log_level: Option<String>,
}

/// Every constant the host-page controller and the embedded bridge depend on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    pub app_url: Url,
    pub typ_path_contains: String,
    pub max_wait_ms: i64,
    pub poll_ms: i64,
    pub eligibility_storage_key: String,
    pub eligibility_ttl_ms: i64,
    pub iframe_id_prefix: String,
    pub wrapper_class: String,
    pub hidden_main_page_row_selector: String,
    pub hidden_main_page_row_indexes: Vec<usize>,
    pub required_answers: RuleSet,
    pub min_iframe_height: u32,
    pub loader_path: String,
    pub reveal_fallback_ms: i64,
    pub lock_interval_ms: i64,
    pub data_layer_poll_ms: i64,
    pub data_layer_poll_limit: u32,
    pub height_request_delays_ms: Vec<i64>,
    pub message_origin: OriginPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            app_url: Url::parse(DEFAULT_APP_URL).expect("default app url is valid"),
            typ_path_contains: "/typ/project-solar/appointment/sp-uk/".to_string(),
            max_wait_ms: 30_000,
            poll_ms: 250,
            eligibility_storage_key: "solar_optly_eligible_submission".to_string(),
            eligibility_ttl_ms: 30 * 60 * 1000,
            iframe_id_prefix: "mvfFormWidget-".to_string(),
            wrapper_class: "chameleon-widget-wrapper".to_string(),
            hidden_main_page_row_selector:
                "div.vc_row.wpb_row.vc_row-fluid.background-position-center-center".to_string(),
            hidden_main_page_row_indexes: vec![0, 2],
            required_answers: RuleSet::solar_defaults(),
            min_iframe_height: 200,
            loader_path: "/loader".to_string(),
            reveal_fallback_ms: 2_500,
            lock_interval_ms: 500,
            data_layer_poll_ms: 500,
            data_layer_poll_limit: 240,
            height_request_delays_ms: vec![0, 250, 900],
            message_origin: OriginPolicy::Any,
        }
    }
}

impl ControllerConfig {
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = env::var("SOLAR_OPTLY_APP_URL") {
            self.app_url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidAppUrl {
                value: raw.clone(),
                source,
            })?;
        }

        if let Ok(raw) = env::var("SOLAR_OPTLY_TYP_PATH") {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::EmptyTypPath);
            }
            self.typ_path_contains = trimmed.to_string();
        }

        if let Ok(raw) = env::var("SOLAR_OPTLY_TTL_MINUTES") {
            let minutes = raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|minutes| *minutes > 0)
                .ok_or(ConfigError::InvalidTtl)?;
            self.eligibility_ttl_ms = chrono::Duration::minutes(minutes).num_milliseconds();
        }

        if let Ok(raw) = env::var("SOLAR_OPTLY_TARGET_ORIGIN") {
            self.message_origin = OriginPolicy::from(raw.trim().to_string());
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidAppUrl {
        value: String,
        source: url::ParseError,
    },
    EmptyTypPath,
    InvalidTtl,
    Read {
        path: String,
        source: std::io::Error,
    },
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidAppUrl { value, .. } => {
                write!(f, "SOLAR_OPTLY_APP_URL '{}' is not an absolute URL", value)
            }
            ConfigError::EmptyTypPath => write!(f, "SOLAR_OPTLY_TYP_PATH must not be empty"),
            ConfigError::InvalidTtl => {
                write!(f, "SOLAR_OPTLY_TTL_MINUTES must be a positive integer")
            }
            ConfigError::Read { path, .. } => write!(f, "unable to read config file {}", path),
            ConfigError::Parse { path, .. } => write!(f, "invalid controller config in {}", path),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidAppUrl { source, .. } => Some(source),
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::EmptyTypPath | ConfigError::InvalidTtl => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("SOLAR_OPTLY_APP_URL");
        env::remove_var("SOLAR_OPTLY_TYP_PATH");
        env::remove_var("SOLAR_OPTLY_TTL_MINUTES");
        env::remove_var("SOLAR_OPTLY_TARGET_ORIGIN");
        env::remove_var("SOLAR_OPTLY_HEIGHT_LOG");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.height_log_level, None);
        assert_eq!(config.controller.app_url.as_str(), DEFAULT_APP_URL);
        assert_eq!(config.controller.eligibility_ttl_ms, 1_800_000);
        assert_eq!(config.controller.hidden_main_page_row_indexes, vec![0, 2]);
        assert_eq!(config.controller.message_origin, OriginPolicy::Any);
    }

    #[test]
    fn environment_picks_the_default_log_level() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        let quiet = AppConfig::load().expect("config loads");
        env::set_var("APP_LOG_LEVEL", "debug");
        let explicit = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(quiet.environment, AppEnvironment::Production);
        assert_eq!(quiet.telemetry.log_level, "warn");
        assert_eq!(explicit.telemetry.log_level, "debug");
    }

    #[test]
    fn env_overrides_app_url_and_ttl() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SOLAR_OPTLY_APP_URL", "https://booking.example.com/loader");
        env::set_var("SOLAR_OPTLY_TTL_MINUTES", "5");
        env::set_var("SOLAR_OPTLY_TARGET_ORIGIN", "https://www.example.co.uk");
        let config = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(
            config.controller.app_url.as_str(),
            "https://booking.example.com/loader"
        );
        assert_eq!(config.controller.eligibility_ttl_ms, 300_000);
        assert_eq!(
            config.controller.message_origin,
            OriginPolicy::Exact("https://www.example.co.uk".to_string())
        );
    }

    #[test]
    fn rejects_relative_app_url() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SOLAR_OPTLY_APP_URL", "/loader");
        let result = AppConfig::load();
        reset_env();

        assert!(matches!(result, Err(ConfigError::InvalidAppUrl { .. })));
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SOLAR_OPTLY_TTL_MINUTES", "0");
        let result = AppConfig::load();
        reset_env();

        assert!(matches!(result, Err(ConfigError::InvalidTtl)));
    }

    #[test]
    fn controller_config_deserializes_partial_json() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{
                "appUrl": "https://staging.example.com/loader",
                "requiredAnswers": {"q1": ["Yes", "homeowner"]},
                "hiddenMainPageRowIndexes": [1]
            }"#,
        )
        .expect("partial config parses");

        assert_eq!(config.app_url.as_str(), "https://staging.example.com/loader");
        assert_eq!(config.hidden_main_page_row_indexes, vec![1]);
        assert_eq!(config.required_answers.len(), 1);
        assert_eq!(config.poll_ms, 250);
    }
}
