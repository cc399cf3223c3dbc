//! Monitor configuration
//!
//! Defaults match a 100k account evaluated over the last 50 trades. Every
//! value can be overridden with a `PERF_MONITOR_*` environment variable.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Configuration injected into a `PerformanceMonitor`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub initial_capital: Decimal,
    /// Threshold used until the first successful optimization
    pub confidence_threshold: f64,
    /// Number of most recent closed trades the metrics and optimizer look at
    pub evaluation_window: usize,
    /// Drawdown ceiling; above it the position size is cut
    pub max_drawdown_threshold: f64,
    /// Win rate above which the position size may grow
    pub target_win_rate: f64,
    /// Parameter history entries kept in memory
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(100000),
            confidence_threshold: 0.6,
            evaluation_window: 50,
            max_drawdown_threshold: 0.02,
            target_win_rate: 0.55,
            history_capacity: 1000,
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `PERF_MONITOR_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            initial_capital: env_or("PERF_MONITOR_INITIAL_CAPITAL", defaults.initial_capital)?,
            confidence_threshold: env_or(
                "PERF_MONITOR_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )?,
            evaluation_window: env_or("PERF_MONITOR_EVALUATION_WINDOW", defaults.evaluation_window)?,
            max_drawdown_threshold: env_or(
                "PERF_MONITOR_MAX_DRAWDOWN",
                defaults.max_drawdown_threshold,
            )?,
            target_win_rate: env_or("PERF_MONITOR_TARGET_WIN_RATE", defaults.target_win_rate)?,
            history_capacity: env_or("PERF_MONITOR_HISTORY_CAPACITY", defaults.history_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(out_of_range("initial_capital", self.initial_capital, "> 0"));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold < 1.0) {
            return Err(out_of_range(
                "confidence_threshold",
                self.confidence_threshold,
                "(0, 1)",
            ));
        }
        if self.evaluation_window == 0 {
            return Err(out_of_range("evaluation_window", self.evaluation_window, ">= 1"));
        }
        if !(self.max_drawdown_threshold > 0.0 && self.max_drawdown_threshold.is_finite()) {
            return Err(out_of_range(
                "max_drawdown_threshold",
                self.max_drawdown_threshold,
                "> 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.target_win_rate) {
            return Err(out_of_range("target_win_rate", self.target_win_rate, "[0, 1]"));
        }
        if self.history_capacity == 0 {
            return Err(out_of_range("history_capacity", self.history_capacity, ">= 1"));
        }
        Ok(())
    }
}

fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_capital = MonitorConfig {
            initial_capital: Decimal::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            bad_capital.validate(),
            Err(ConfigError::OutOfRange { field: "initial_capital", .. })
        ));

        let bad_window = MonitorConfig {
            evaluation_window: 0,
            ..Default::default()
        };
        assert!(bad_window.validate().is_err());

        let bad_target = MonitorConfig {
            target_win_rate: 1.5,
            ..Default::default()
        };
        assert!(bad_target.validate().is_err());
    }

    #[test]
    fn test_env_override_and_parse_error() {
        // Unique variable names so parallel tests do not race on the environment
        std::env::set_var("PERF_MONITOR_TEST_WINDOW_OK", " 75 ");
        assert_eq!(env_or("PERF_MONITOR_TEST_WINDOW_OK", 50usize), Ok(75));

        std::env::set_var("PERF_MONITOR_TEST_WINDOW_BAD", "lots");
        assert_eq!(
            env_or("PERF_MONITOR_TEST_WINDOW_BAD", 50usize),
            Err(ConfigError::InvalidEnv {
                name: "PERF_MONITOR_TEST_WINDOW_BAD",
                value: "lots".to_string(),
            })
        );

        assert_eq!(env_or("PERF_MONITOR_TEST_UNSET", 0.02f64), Ok(0.02));
    }
}
