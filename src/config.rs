//! Configuration module for skyrelay.
//!
//! Configuration is read from an optional TOML file with `${VAR}`
//! environment substitution, then overridden by the process environment.
//!
//! # Example
//!
//! ```toml
//! [control_api]
//! base_url = "${API_BASE_URL}"
//! api_key = "${ADMIN_API_KEY}"
//! platform = "bluesky"
//!
//! [stream]
//! url = "wss://jetstream1.us-west.bsky.network/subscribe"
//! clean_close_delay_ms = 5000
//! error_delay_ms = 10000
//! ```
//!
//! Environment overrides: `API_BASE_URL`, `ADMIN_API_KEY`, `JETSTREAM_URL`,
//! `SKYRELAY_PLATFORM`.

use crate::control_api::HttpControlApi;
use crate::event::POST_COLLECTION;
use crate::stream::BackoffPolicy;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default Jetstream subscription endpoint
pub const DEFAULT_STREAM_URL: &str = "wss://jetstream1.us-west.bsky.network/subscribe";

/// Platform segment of the authors endpoint
pub const DEFAULT_PLATFORM: &str = "bluesky";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub control_api: ControlApiConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// Control API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlApiConfig {
    /// Base URL, prefixed verbatim to endpoint paths
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer credential
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_trigger_timeout_ms")]
    pub trigger_timeout_ms: u64,
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            platform: default_platform(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            trigger_timeout_ms: default_trigger_timeout_ms(),
        }
    }
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    10000
}

fn default_trigger_timeout_ms() -> u64 {
    15000
}

/// Stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_stream_url")]
    pub url: String,

    /// Collection whose creates are forwarded
    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_clean_close_delay_ms")]
    pub clean_close_delay_ms: u64,

    /// Added to the clean-close delay after a transport error
    #[serde(default = "default_error_delay_ms")]
    pub error_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            collection: default_collection(),
            clean_close_delay_ms: default_clean_close_delay_ms(),
            error_delay_ms: default_error_delay_ms(),
        }
    }
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_collection() -> String {
    POST_COLLECTION.to_string()
}

fn default_clean_close_delay_ms() -> u64 {
    5000
}

fn default_error_delay_ms() -> u64 {
    10000
}

impl RelayConfig {
    /// Load configuration from `SKYRELAY_CONFIG` (or the default path),
    /// apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("SKYRELAY_CONFIG").unwrap_or_else(|_| "config/skyrelay.toml".to_string());

        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;

        info!(
            platform = %config.control_api.platform,
            stream_url = %config.stream.url,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from a specific path without validating it.
    ///
    /// A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("API_BASE_URL") {
            self.control_api.base_url = Some(base_url);
        }
        if let Some(api_key) = lookup("ADMIN_API_KEY") {
            self.control_api.api_key = Some(api_key);
        }
        if let Some(platform) = lookup("SKYRELAY_PLATFORM") {
            self.control_api.platform = platform;
        }
        if let Some(url) = lookup("JETSTREAM_URL") {
            self.stream.url = url;
        }
    }

    /// Validate the configuration and normalise the base URL.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let base_url = match self.control_api.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() && !url.contains("${") => url.to_string(),
            _ => {
                return Err(ConfigError::MissingField(
                    "control_api.base_url (API_BASE_URL)".to_string(),
                ))
            }
        };

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(
                "control_api.base_url must start with http:// or https://".to_string(),
            ));
        }

        // Endpoint paths are appended directly
        let base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{}/", base_url)
        };
        self.control_api.base_url = Some(base_url);

        if self.control_api.platform.is_empty() {
            return Err(ConfigError::ValidationError(
                "control_api.platform must not be empty".to_string(),
            ));
        }

        if self.control_api.api_key.as_deref().map_or(true, str::is_empty) {
            warn!("ADMIN_API_KEY not set, control API requests will carry an empty bearer token");
        }

        if !self.stream.url.starts_with("ws://") && !self.stream.url.starts_with("wss://") {
            return Err(ConfigError::ValidationError(
                "stream.url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.stream.error_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "stream.error_delay_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL; empty until [`RelayConfig::validate`] has succeeded.
    pub fn base_url(&self) -> &str {
        self.control_api.base_url.as_deref().unwrap_or_default()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.control_api.fetch_timeout_ms)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.control_api.trigger_timeout_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            clean_close_delay: Duration::from_millis(self.stream.clean_close_delay_ms),
            error_delay: Duration::from_millis(self.stream.error_delay_ms),
        }
    }

    /// Build the HTTP control API client.
    pub fn control_api_client(&self) -> HttpControlApi {
        HttpControlApi::new(
            self.base_url(),
            self.control_api.api_key.clone().unwrap_or_default(),
        )
        .with_fetch_timeout(self.fetch_timeout())
        .with_trigger_timeout(self.trigger_timeout())
    }
}

fn env_placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    env_placeholder()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn validated(toml: &str) -> Result<RelayConfig, ConfigError> {
        let mut config: RelayConfig = toml::from_str(toml).unwrap();
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("SKYRELAY_TEST_VAR", "substituted_value");
        let input = "url = \"${SKYRELAY_TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("SKYRELAY_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${SKYRELAY_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${SKYRELAY_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.control_api.base_url.is_none());
        assert_eq!(config.control_api.platform, "bluesky");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.trigger_timeout(), Duration::from_secs(15));
        assert_eq!(config.stream.url, DEFAULT_STREAM_URL);
        assert_eq!(config.stream.collection, POST_COLLECTION);
        assert_eq!(config.backoff_policy(), BackoffPolicy::default());
    }

    #[test]
    fn test_missing_base_url_is_fatal() {
        let result = validated("");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));

        let result = validated("[control_api]\nbase_url = \"  \"");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));

        let result = validated("[control_api]\nbase_url = \"${API_BASE_URL_UNSET}\"");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_parse_full_config() {
        let config = validated(
            r#"
            [control_api]
            base_url = "https://api.example.com/v1"
            api_key = "secret"
            platform = "bluesky"
            fetch_timeout_ms = 2000

            [stream]
            url = "ws://localhost:6008/subscribe"
            clean_close_delay_ms = 100
            error_delay_ms = 200
        "#,
        )
        .unwrap();

        // Trailing slash added
        assert_eq!(config.base_url(), "https://api.example.com/v1/");
        assert_eq!(config.control_api.api_key.as_deref(), Some("secret"));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(2));
        assert_eq!(config.trigger_timeout(), Duration::from_secs(15));
        assert_eq!(
            config.backoff_policy(),
            BackoffPolicy {
                clean_close_delay: Duration::from_millis(100),
                error_delay: Duration::from_millis(200),
            }
        );

        let api = config.control_api_client();
        assert_eq!(
            api.trigger_url(),
            "https://api.example.com/v1/process-tweet/trigger-workflow"
        );
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("API_BASE_URL", "https://override.example.com/"),
            ("ADMIN_API_KEY", "env-key"),
            ("JETSTREAM_URL", "wss://jetstream2.example.com/subscribe"),
        ]);

        let mut config: RelayConfig = toml::from_str(
            r#"
            [control_api]
            base_url = "https://file.example.com/"
            api_key = "file-key"
        "#,
        )
        .unwrap();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        config.validate().unwrap();

        assert_eq!(config.base_url(), "https://override.example.com/");
        assert_eq!(config.control_api.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.control_api.platform, "bluesky");
        assert_eq!(config.stream.url, "wss://jetstream2.example.com/subscribe");
    }

    #[test]
    fn test_validation_invalid_urls() {
        let result = validated("[control_api]\nbase_url = \"api.example.com/\"");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = validated(
            "[control_api]\nbase_url = \"https://api.example.com/\"\n[stream]\nurl = \"https://jetstream\"",
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_zero_error_delay() {
        let result = validated(
            "[control_api]\nbase_url = \"https://api.example.com/\"\n[stream]\nerror_delay_ms = 0",
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_api_key_is_allowed() {
        let config = validated("[control_api]\nbase_url = \"https://api.example.com/\"").unwrap();
        assert!(config.control_api.api_key.is_none());
    }

    #[test]
    fn test_load_from_missing_file() {
        let config = RelayConfig::load_from("/nonexistent/skyrelay.toml").unwrap();
        assert!(config.control_api.base_url.is_none());
    }
}
