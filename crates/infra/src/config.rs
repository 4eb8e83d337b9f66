//! Process configuration read from the environment (after an optional `.env`).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use itemflow_providers::{HttpProvidersConfig, MeliCredentials};
use itemflow_providers::clients::{GEMINI_BASE_URL, MELI_BASE_URL};

use crate::jobs::{BackoffStrategy, ExecutorConfig, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Load `.env` if present. Missing files are not an error.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    /// SQLite file path, or `:memory:`.
    pub db_path: String,
    pub bind: String,
    pub default_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub meli_base_url: String,
    pub meli_access_token: Option<String>,
    pub meli_refresh_token: Option<String>,
    pub meli_client_id: Option<String>,
    pub meli_client_secret: Option<String>,
    /// Serve synthetic items and enrichments instead of calling the live APIs.
    pub use_mock_providers: bool,
    pub worker_pool_size: usize,
    pub max_retries: u32,
    pub retry_backoff: BackoffStrategy,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub call_timeout: Duration,
    pub available_models: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "Enriched Items API".to_string(),
            app_env: "local".to_string(),
            db_path: "data/app.db".to_string(),
            bind: "0.0.0.0:8000".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            gemini_api_key: None,
            gemini_base_url: GEMINI_BASE_URL.to_string(),
            meli_base_url: MELI_BASE_URL.to_string(),
            meli_access_token: None,
            meli_refresh_token: None,
            meli_client_id: None,
            meli_client_secret: None,
            use_mock_providers: false,
            worker_pool_size: 4,
            max_retries: 3,
            retry_backoff: BackoffStrategy::Exponential,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_millis(30_000),
            call_timeout: Duration::from_secs(20),
            available_models: vec![
                DEFAULT_MODEL.to_string(),
                "gemini-2.0-flash-lite".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Build from process environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let available_models = match get("AVAILABLE_MODELS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.available_models,
        };

        Ok(Self {
            app_name: get("APP_NAME").unwrap_or(defaults.app_name),
            app_env: get("APP_ENV").unwrap_or(defaults.app_env),
            db_path: get("APP_DB_PATH").unwrap_or(defaults.db_path),
            bind: get("APP_BIND").unwrap_or(defaults.bind),
            default_model: get("GEMINI_MODEL").unwrap_or(defaults.default_model),
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            meli_base_url: get("MELI_BASE_URL").unwrap_or(defaults.meli_base_url),
            meli_access_token: get("MELI_ACCESS_TOKEN"),
            meli_refresh_token: get("MELI_REFRESH_TOKEN"),
            meli_client_id: get("MELI_CLIENT_ID"),
            meli_client_secret: get("MELI_CLIENT_SECRET"),
            use_mock_providers: parse_flag(&get, "USE_MOCK_PROVIDERS", defaults.use_mock_providers)?,
            worker_pool_size: parse(&get, "WORKER_POOL_SIZE", defaults.worker_pool_size)?,
            max_retries: parse(&get, "MAX_RETRIES", defaults.max_retries)?,
            retry_backoff: parse(&get, "RETRY_BACKOFF", defaults.retry_backoff)?,
            retry_base_delay: Duration::from_millis(parse(
                &get,
                "RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(parse(
                &get,
                "RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )?),
            call_timeout: Duration::from_secs(parse(
                &get,
                "CALL_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            available_models,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_backoff,
            self.max_retries,
            self.retry_base_delay,
            self.retry_max_delay,
        )
    }

    /// Settings for the live MercadoLibre and Gemini clients.
    pub fn http_providers_config(&self) -> HttpProvidersConfig {
        HttpProvidersConfig {
            meli_base_url: self.meli_base_url.clone(),
            meli: MeliCredentials {
                access_token: self.meli_access_token.clone(),
                refresh_token: self.meli_refresh_token.clone(),
                client_id: self.meli_client_id.clone(),
                client_secret: self.meli_client_secret.clone(),
            },
            gemini_base_url: self.gemini_base_url.clone(),
            gemini_api_key: self.gemini_api_key.clone(),
            fallback_models: self.available_models.clone(),
            request_timeout: self.call_timeout,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_pool_size(self.worker_pool_size)
            .with_retry_policy(self.retry_policy())
            .with_call_timeout(self.call_timeout)
    }

    /// Startup summary without secrets.
    pub fn log_summary(&self) {
        info!(
            app = %self.app_name,
            env = %self.app_env,
            db_path = %self.db_path,
            bind = %self.bind,
            default_model = %self.default_model,
            mock_providers = self.use_mock_providers,
            source_credential = self.meli_access_token.is_some(),
            token_refresh = self.meli_refresh_token.is_some(),
            enricher_credential = self.gemini_api_key.is_some(),
            pool_size = self.worker_pool_size,
            max_retries = self.max_retries,
            backoff = self.retry_backoff.as_str(),
            "configuration loaded"
        );
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_flag<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.executor_config().pool_size, 4);
        assert_eq!(config.executor_config().retry_policy.max_retries, 3);
    }

    #[test]
    fn reads_overrides_and_credential_fallback() {
        let config = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "prod"),
            ("APP_DB_PATH", ":memory:"),
            ("GOOGLE_API_KEY", "g-key"),
            ("WORKER_POOL_SIZE", "8"),
            ("RETRY_BASE_DELAY_MS", "250"),
            ("AVAILABLE_MODELS", "a, b,,c"),
        ]))
        .unwrap();

        assert_eq!(config.app_env, "prod");
        assert_eq!(config.db_path, ":memory:");
        assert_eq!(config.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.available_models, vec!["a", "b", "c"]);
    }

    #[test]
    fn primary_credential_wins_and_blank_is_unset() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "primary"),
            ("GOOGLE_API_KEY", "fallback"),
            ("MELI_ACCESS_TOKEN", "  "),
        ]))
        .unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("primary"));
        assert_eq!(config.meli_access_token, None);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[("MAX_RETRIES", "three")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "MAX_RETRIES",
                value: "three".into()
            }
        );
    }

    #[test]
    fn live_collaborator_settings_are_read() {
        let config = AppConfig::from_lookup(lookup(&[
            ("MELI_BASE_URL", "http://meli.local"),
            ("MELI_ACCESS_TOKEN", "access"),
            ("MELI_REFRESH_TOKEN", "refresh"),
            ("MELI_CLIENT_ID", "id"),
            ("MELI_CLIENT_SECRET", "secret"),
            ("GEMINI_API_KEY", "g"),
            ("CALL_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert!(!config.use_mock_providers);
        let http = config.http_providers_config();
        assert_eq!(http.meli_base_url, "http://meli.local");
        assert_eq!(http.gemini_base_url, GEMINI_BASE_URL);
        assert_eq!(http.meli.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(http.gemini_api_key.as_deref(), Some("g"));
        assert_eq!(http.fallback_models, config.available_models);
        assert_eq!(http.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn mock_flag_and_backoff_strategy_are_parsed() {
        let config = AppConfig::from_lookup(lookup(&[
            ("USE_MOCK_PROVIDERS", "TRUE"),
            ("RETRY_BACKOFF", "linear"),
            ("RETRY_BASE_DELAY_MS", "100"),
        ]))
        .unwrap();
        assert!(config.use_mock_providers);

        let policy = config.executor_config().retry_policy;
        assert_eq!(policy.strategy, BackoffStrategy::Linear);
        assert_eq!(policy.base_delay, Duration::from_millis(100));

        assert!(AppConfig::from_lookup(lookup(&[("USE_MOCK_PROVIDERS", "maybe")])).is_err());
        assert_eq!(
            AppConfig::from_lookup(lookup(&[("RETRY_BACKOFF", "random")])).unwrap_err(),
            ConfigError::Invalid {
                key: "RETRY_BACKOFF",
                value: "random".into()
            }
        );
    }
}
