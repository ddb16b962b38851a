// Configuration for the currency rate cache

use crate::currency::BASE_CURRENCY;
use std::time::Duration;
use thiserror::Error;

pub const ENV_RATES_ENDPOINT: &str = "RESORT_RATES_ENDPOINT";
pub const ENV_FRESHNESS_SECS: &str = "RESORT_RATES_FRESHNESS_SECS";
pub const ENV_TIMEOUT_MS: &str = "RESORT_RATES_TIMEOUT_MS";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration error: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    // Rates are requested from `{rates_endpoint}/THB`; the base currency is fixed
    pub rates_endpoint: String,
    // Maximum age of a persisted rate table before a refresh is attempted
    pub freshness_threshold: Duration,
    pub request_timeout: Duration,
    pub rates_cache_key: String,
    pub rates_timestamp_key: String,
    pub selected_currency_key: String,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            rates_endpoint: "https://open.er-api.com/v6/latest".to_string(),
            freshness_threshold: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(10),
            rates_cache_key: "currency_rates_cache".to_string(),
            rates_timestamp_key: "currency_rates_timestamp".to_string(),
            selected_currency_key: "currencyCode".to_string(),
        }
    }
}

impl CurrencyConfig {
    // Defaults overridden by any RESORT_RATES_* variables in the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_RATES_ENDPOINT) {
            let endpoint = endpoint.trim().trim_end_matches('/').to_string();
            if endpoint.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_RATES_ENDPOINT.to_string(),
                    value: endpoint,
                });
            }
            config.rates_endpoint = endpoint;
        }

        if let Some(secs) = lookup(ENV_FRESHNESS_SECS) {
            let secs = parse_number(ENV_FRESHNESS_SECS, &secs)?;
            config.freshness_threshold = Duration::from_secs(secs);
        }

        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            let ms = parse_number(ENV_TIMEOUT_MS, &ms)?;
            if ms == 0 {
                return Err(ConfigError::Other(format!(
                    "{} must be greater than zero",
                    ENV_TIMEOUT_MS
                )));
            }
            config.request_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn rates_url(&self) -> String {
        format!(
            "{}/{}",
            self.rates_endpoint.trim_end_matches('/'),
            BASE_CURRENCY
        )
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CurrencyConfig::default();
        assert_eq!(config.freshness_threshold, Duration::from_secs(1800));
        assert_eq!(config.rates_url(), "https://open.er-api.com/v6/latest/THB");
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = CurrencyConfig::from_lookup(lookup_from(&[
            (ENV_RATES_ENDPOINT, "http://127.0.0.1:9000/latest/"),
            (ENV_FRESHNESS_SECS, "60"),
            (ENV_TIMEOUT_MS, "250"),
        ]))
        .unwrap();

        assert_eq!(config.rates_url(), "http://127.0.0.1:9000/latest/THB");
        assert_eq!(config.freshness_threshold, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_variables_keep_defaults() {
        let config = CurrencyConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.selected_currency_key, "currencyCode");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = CurrencyConfig::from_lookup(lookup_from(&[(ENV_FRESHNESS_SECS, "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_FRESHNESS_SECS.to_string(),
                value: "soon".to_string(),
            }
        );

        assert!(CurrencyConfig::from_lookup(lookup_from(&[(ENV_TIMEOUT_MS, "0")])).is_err());
        assert!(CurrencyConfig::from_lookup(lookup_from(&[(ENV_RATES_ENDPOINT, "  ")])).is_err());
    }
}
