//! Process-level settings loaded from the environment or JSON.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::retry::RetryPolicy;
use crate::security::destination::DEFAULT_INTERNAL_SUFFIXES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Runtime settings shared by every operation of the facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub proxy_url: Option<String>,
    /// Default per-attempt timeout, in seconds.
    pub default_timeout: u64,
    pub log_level: String,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub base_delay_ms: u64,
    pub max_batch_size: usize,
    pub internal_suffixes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_url: None,
            default_timeout: 30,
            log_level: "INFO".into(),
            max_retries: 3,
            backoff_factor: 1.5,
            base_delay_ms: 1000,
            max_batch_size: 100,
            internal_suffixes: DEFAULT_INTERNAL_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Read settings from an arbitrary key/value source. Unknown keys are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().trim().to_string()))
            .collect();
        let mut settings = Settings::default();

        if let Some(value) = vars.get("PROXY_URL") {
            settings.proxy_url = (!value.is_empty()).then(|| value.clone());
        }
        if let Some(value) = vars.get("DEFAULT_TIMEOUT") {
            settings.default_timeout = parse_number("DEFAULT_TIMEOUT", value)?;
        }
        if let Some(value) = vars.get("LOG_LEVEL") {
            settings.log_level = value.clone();
        }
        if let Some(value) = vars.get("MAX_RETRIES") {
            settings.max_retries = parse_number("MAX_RETRIES", value)?;
        }
        if let Some(value) = vars.get("BACKOFF_FACTOR") {
            settings.backoff_factor = parse_number("BACKOFF_FACTOR", value)?;
        }
        if let Some(value) = vars.get("BASE_DELAY_MS") {
            settings.base_delay_ms = parse_number("BASE_DELAY_MS", value)?;
        }
        if let Some(value) = vars.get("MAX_BATCH_SIZE") {
            settings.max_batch_size = parse_number("MAX_BATCH_SIZE", value)?;
        }
        if let Some(value) = vars.get("INTERNAL_SUFFIXES") {
            settings.internal_suffixes = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(document)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=300).contains(&self.default_timeout) {
            return Err(ConfigError::invalid(
                "DEFAULT_TIMEOUT",
                self.default_timeout.to_string(),
                "must be between 1 and 300 seconds",
            ));
        }
        if self.max_retries > 10 {
            return Err(ConfigError::invalid(
                "MAX_RETRIES",
                self.max_retries.to_string(),
                "must be between 0 and 10",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "BACKOFF_FACTOR",
                self.backoff_factor.to_string(),
                "must be a finite number >= 1.0",
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("MAX_BATCH_SIZE", "0", "must be positive"));
        }
        if self.log_level_filter().is_none() {
            return Err(ConfigError::invalid(
                "LOG_LEVEL",
                self.log_level.clone(),
                "expected one of TRACE, DEBUG, INFO, WARNING, ERROR, OFF",
            ));
        }
        Ok(())
    }

    /// Parsed `LOG_LEVEL`; `WARNING` and `CRITICAL` are accepted as aliases.
    ///
    /// The facade's [`LoggingHandler`](crate::modules::LoggingHandler) drops
    /// events above this level. Installing a logger, and its global filter,
    /// is left to the embedding binary.
    pub fn log_level_filter(&self) -> Option<log::LevelFilter> {
        match self.log_level.to_ascii_uppercase().as_str() {
            "TRACE" => Some(log::LevelFilter::Trace),
            "DEBUG" => Some(log::LevelFilter::Debug),
            "INFO" => Some(log::LevelFilter::Info),
            "WARN" | "WARNING" => Some(log::LevelFilter::Warn),
            "ERROR" | "CRITICAL" => Some(log::LevelFilter::Error),
            "OFF" => Some(log::LevelFilter::Off),
            _ => None,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_backoff_factor(self.backoff_factor)
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| ConfigError::invalid(key, value, err.to_string()))
}
