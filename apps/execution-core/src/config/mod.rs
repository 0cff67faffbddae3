//! Configuration loading for the execution layer.
//!
//! YAML files with environment variable interpolation; every section has
//! serde defaults so a missing section falls back to sane paper-trading
//! values.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::config::{Config, load_config};
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//! ```

mod engine;
mod reconciliation;
mod retry;
mod risk;
mod venue;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::EngineConfig;
pub use reconciliation::ReconciliationConfig;
pub use retry::RetryConfig;
pub use risk::RiskConfig;
pub use venue::{CommissionConfig, PaperVenueConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Execution manager and router tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Risk limits.
    #[serde(default)]
    pub risk: RiskConfig,
    /// Paper venue parameters.
    #[serde(default)]
    pub venue: PaperVenueConfig,
    /// Periodic reconciliation.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Backoff for transient venue failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Load configuration from a YAML file with environment variable
/// interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or
/// validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)]
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("static env var pattern is valid")
    });

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    use rust_decimal::Decimal;

    if config.venue.initial_capital <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "venue.initial_capital must be positive".to_string(),
        ));
    }

    for (name, p) in [
        ("venue.reject_probability", config.venue.reject_probability),
        (
            "venue.partial_fill_probability",
            config.venue.partial_fill_probability,
        ),
    ] {
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be between 0.0 and 1.0"
            )));
        }
    }

    if config.venue.slippage_pct < Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "venue.slippage_pct must not be negative".to_string(),
        ));
    }

    if config.risk.max_leverage <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "risk.max_leverage must be positive".to_string(),
        ));
    }

    if config.risk.max_position_size <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "risk.max_position_size must be positive".to_string(),
        ));
    }

    if config.risk.max_order_value <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "risk.max_order_value must be positive".to_string(),
        ));
    }

    if config.reconciliation.enabled && config.reconciliation.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reconciliation.interval_secs must be positive when enabled".to_string(),
        ));
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.engine.submission_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.submission_timeout_secs must be positive".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = load_config_from_string("{}").unwrap();
        assert_eq!(config.risk.max_daily_orders, 100);
        assert_eq!(config.reconciliation.interval_secs, 300);
        assert_eq!(config.venue.initial_capital, dec!(100000));
        assert!(!config.reconciliation.auto_sync);
    }

    #[test]
    fn sections_override_defaults() {
        let yaml = r"
risk:
  max_order_value: 50000
  max_daily_orders: 25
  denied_instruments: [DOGE-USD]
venue:
  initial_capital: 250000
  slippage_pct: 0.001
  commission:
    per_unit: 0.01
";
        let config = load_config_from_string(yaml).unwrap();
        assert_eq!(config.risk.max_order_value, dec!(50000));
        assert_eq!(config.risk.max_daily_orders, 25);
        assert_eq!(config.venue.initial_capital, dec!(250000));
        assert_eq!(config.venue.commission.per_unit, dec!(0.01));
        // Untouched sections keep defaults
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn env_interpolation_with_default() {
        let yaml = "
venue:
  initial_capital: ${EXEC_CORE_TEST_CAPITAL:-75000}
";
        let config = load_config_from_string(yaml).unwrap();
        assert_eq!(config.venue.initial_capital, dec!(75000));
    }

    #[test]
    fn invalid_probability_rejected() {
        let yaml = "
venue:
  reject_probability: 1.5
";
        let err = load_config_from_string(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn zero_capital_rejected() {
        let yaml = "
venue:
  initial_capital: 0
";
        assert!(load_config_from_string(yaml).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "risk:\n  max_daily_orders: 7").unwrap();
        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.risk.max_daily_orders, 7);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load_config(Some("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn risk_config_converts_to_limits() {
        let yaml = "
risk:
  allowed_instruments: [BTC-USD, ETH-USD]
  denied_instruments: [DOGE-USD]
";
        let config = load_config_from_string(yaml).unwrap();
        let limits = config.risk.to_risk_limits();
        assert!(
            limits
                .allowed_instruments
                .contains(&crate::models::Instrument::from("BTC-USD"))
        );
        assert!(
            limits
                .denied_instruments
                .contains(&crate::models::Instrument::from("DOGE-USD"))
        );
    }
}
