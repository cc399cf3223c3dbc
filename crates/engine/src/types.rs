//! Records exchanged between the ledger, the aggregator and the optimizer

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Lower bound of the position-size scaling factor
pub const MIN_POSITION_SIZE_FACTOR: f64 = 0.2;
/// Upper bound of the position-size scaling factor
pub const MAX_POSITION_SIZE_FACTOR: f64 = 2.0;
/// Shortest allowed signal cooldown, in seconds
pub const MIN_SIGNAL_COOLDOWN_SECS: f64 = 30.0;
/// Longest allowed signal cooldown, in seconds
pub const MAX_SIGNAL_COOLDOWN_SECS: f64 = 300.0;
/// Cooldown used before the first optimization
pub const DEFAULT_SIGNAL_COOLDOWN_SECS: f64 = 60.0;

/// Inclusive range `clamped` pulls the confidence threshold into
const CONFIDENCE_CLAMP: (f64, f64) = (0.01, 0.99);

// ============================================================================
// Trade events (boundary with the broker feed)
// ============================================================================

/// A fill that opens a position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEntry {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    /// Signed quantity, negative for shorts
    pub position_size: Decimal,
    /// Model confidence in [0, 1]
    pub signal_confidence: f64,
    #[serde(default)]
    pub volatility: f64,
}

/// A fill that closes the open position on `symbol`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExit {
    pub symbol: String,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    #[serde(default)]
    pub market_impact: Decimal,
}

/// One line of a newline-delimited event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TradeEvent {
    Entry(TradeEntry),
    Exit(TradeExit),
}

// ============================================================================
// Trade record
// ============================================================================

/// Lifecycle record of a single trade.
///
/// Exit fields stay `None` while the trade is open; `pnl` and `duration_ms`
/// are filled exactly once, when the ledger closes the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub position_size: Decimal,
    pub signal_confidence: f64,
    pub pnl: Option<Decimal>,
    /// Holding time in milliseconds
    pub duration_ms: Option<i64>,
    pub volatility_at_entry: f64,
    pub market_impact: Decimal,
}

impl TradeRecord {
    /// Build an open record from an entry event
    pub fn open(entry: TradeEntry) -> Self {
        Self {
            symbol: entry.symbol,
            entry_time: entry.entry_time,
            exit_time: None,
            entry_price: entry.entry_price,
            exit_price: None,
            position_size: entry.position_size,
            signal_confidence: entry.signal_confidence,
            pnl: None,
            duration_ms: None,
            volatility_at_entry: entry.volatility,
            market_impact: Decimal::ZERO,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }

    /// Closed with a strictly positive PnL
    pub fn is_win(&self) -> bool {
        self.pnl.is_some_and(|p| p > Decimal::ZERO)
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_ms.map(|ms| ms as f64 / 1000.0)
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Strategy parameters retuned by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSet {
    pub(crate) confidence_threshold: f64,
    pub(crate) position_size_factor: f64,
    #[serde(rename = "signal_cooldown")]
    pub(crate) signal_cooldown_seconds: f64,
}

impl ParameterSet {
    /// Build a parameter set, rejecting values outside their allowed ranges
    pub fn new(
        confidence_threshold: f64,
        position_size_factor: f64,
        signal_cooldown_seconds: f64,
    ) -> Result<Self, ConfigError> {
        if !(confidence_threshold > 0.0 && confidence_threshold < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "confidence_threshold",
                value: confidence_threshold.to_string(),
                expected: "(0, 1)",
            });
        }
        if !(MIN_POSITION_SIZE_FACTOR..=MAX_POSITION_SIZE_FACTOR).contains(&position_size_factor) {
            return Err(ConfigError::OutOfRange {
                field: "position_size_factor",
                value: position_size_factor.to_string(),
                expected: "[0.2, 2.0]",
            });
        }
        if !(MIN_SIGNAL_COOLDOWN_SECS..=MAX_SIGNAL_COOLDOWN_SECS).contains(&signal_cooldown_seconds) {
            return Err(ConfigError::OutOfRange {
                field: "signal_cooldown_seconds",
                value: signal_cooldown_seconds.to_string(),
                expected: "[30, 300]",
            });
        }

        Ok(Self {
            confidence_threshold,
            position_size_factor,
            signal_cooldown_seconds,
        })
    }

    /// Build a parameter set, forcing every value into its allowed range
    pub fn clamped(
        confidence_threshold: f64,
        position_size_factor: f64,
        signal_cooldown_seconds: f64,
    ) -> Self {
        Self {
            confidence_threshold: confidence_threshold.clamp(CONFIDENCE_CLAMP.0, CONFIDENCE_CLAMP.1),
            position_size_factor: position_size_factor
                .clamp(MIN_POSITION_SIZE_FACTOR, MAX_POSITION_SIZE_FACTOR),
            signal_cooldown_seconds: signal_cooldown_seconds
                .clamp(MIN_SIGNAL_COOLDOWN_SECS, MAX_SIGNAL_COOLDOWN_SECS),
        }
    }

    /// Defaults for a fresh strategy: the given threshold, factor 1.0, 60 s cooldown
    pub fn initial(confidence_threshold: f64) -> Self {
        Self::clamped(confidence_threshold, 1.0, DEFAULT_SIGNAL_COOLDOWN_SECS)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn position_size_factor(&self) -> f64 {
        self.position_size_factor
    }

    pub fn signal_cooldown_seconds(&self) -> f64 {
        self.signal_cooldown_seconds
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Summed PnL of one calendar day, relative to initial capital
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyReturn {
    pub date: NaiveDate,
    pub value: f64,
}

/// Metrics computed from a trailing window of closed trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub win_rate: f64,
    #[serde(with = "ratio")]
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub current_capital: Decimal,
    pub trades_in_window: usize,
    pub daily_returns: Vec<DailyReturn>,
}

impl PerformanceSnapshot {
    /// All-zero metrics for a ledger with no closed trades yet
    pub fn empty(current_capital: Decimal) -> Self {
        Self {
            win_rate: 0.0,
            profit_factor: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            current_capital,
            trades_in_window: 0,
            daily_returns: Vec::new(),
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            win_rate: self.win_rate,
            profit_factor: self.profit_factor,
            sharpe_ratio: self.sharpe_ratio,
            max_drawdown: self.max_drawdown,
        }
    }
}

/// The four headline metrics, as recorded alongside each parameter change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub win_rate: f64,
    #[serde(with = "ratio")]
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

/// One entry of the optimizer's history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRecord {
    /// Monotonic per optimizer, survives ring-buffer eviction
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub params: ParameterSet,
    pub metrics: MetricsSummary,
}

// ============================================================================
// Export
// ============================================================================

/// Payload handed to a snapshot sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsExportRecord {
    pub timestamp: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub current_capital: Decimal,
    pub total_return_pct: Decimal,
    pub win_rate: f64,
    #[serde(with = "ratio")]
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub optimal_params: ParameterSet,
    pub number_of_trades: usize,
    pub active_trades: usize,
}

/// Serde helpers for ratios that may be +infinity.
///
/// JSON has no infinity, so a non-finite ratio is written as its `f64`
/// display form (`"inf"`) and parsed back from either a number or a string.
pub mod ratio {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_set_rejects_out_of_range() {
        assert!(ParameterSet::new(0.6, 1.0, 60.0).is_ok());
        assert!(ParameterSet::new(1.0, 1.0, 60.0).is_err());
        assert!(ParameterSet::new(0.0, 1.0, 60.0).is_err());
        assert!(ParameterSet::new(0.6, 2.5, 60.0).is_err());
        assert!(ParameterSet::new(0.6, 1.0, 10.0).is_err());
        assert!(ParameterSet::new(f64::NAN, 1.0, 60.0).is_err());
    }

    #[test]
    fn test_parameter_set_clamped() {
        let params = ParameterSet::clamped(1.4, 0.05, 900.0);
        assert_eq!(params.confidence_threshold(), 0.99);
        assert_eq!(params.position_size_factor(), MIN_POSITION_SIZE_FACTOR);
        assert_eq!(params.signal_cooldown_seconds(), MAX_SIGNAL_COOLDOWN_SECS);
    }

    #[test]
    fn test_parameter_set_serializes_cooldown_name() {
        let json = serde_json::to_value(ParameterSet::initial(0.6)).unwrap();
        assert_eq!(json["signal_cooldown"], 60.0);
        assert_eq!(json["position_size_factor"], 1.0);
    }

    #[test]
    fn test_infinite_profit_factor_survives_json() {
        let summary = MetricsSummary {
            win_rate: 1.0,
            profit_factor: f64::INFINITY,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"profit_factor\":\"inf\""));

        let back: MetricsSummary = serde_json::from_str(&json).unwrap();
        assert!(back.profit_factor.is_infinite());

        let finite: MetricsSummary = serde_json::from_str(
            r#"{"win_rate":0.5,"profit_factor":1.5,"sharpe_ratio":0.1,"max_drawdown":0.0}"#,
        )
        .unwrap();
        assert_eq!(finite.profit_factor, 1.5);
    }

    #[test]
    fn test_trade_event_tagged_json() {
        let line = r#"{"type":"exit","symbol":"AAPL","exit_time":"2026-01-05T16:00:00Z","exit_price":"110"}"#;
        match serde_json::from_str::<TradeEvent>(line).unwrap() {
            TradeEvent::Exit(exit) => {
                assert_eq!(exit.symbol, "AAPL");
                assert_eq!(exit.market_impact, Decimal::ZERO);
            }
            TradeEvent::Entry(_) => panic!("expected exit event"),
        }
    }
}
