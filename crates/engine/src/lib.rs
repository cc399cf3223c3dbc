//! Performance monitoring and adaptive parameter tuning for a live strategy
//!
//! Provides:
//! - Trade ledger with per-symbol open trades and running capital
//! - Rolling metrics: win rate, profit factor, daily-return Sharpe, drawdown
//! - Sample-gated parameter optimizer with clamped adjustments and history
//! - Snapshot export sinks (JSON file, SQLite, in-memory)

pub mod config;
pub mod export;
pub mod ledger;
pub mod metrics;
pub mod monitor;
pub mod optimizer;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, MonitorConfig};
pub use export::{
    ExportError, HistorySink, JsonFileSink, MemorySink, SnapshotSink, SqliteSnapshotSink,
};
pub use ledger::{LedgerError, TradeLedger};
pub use metrics::MetricsAggregator;
pub use monitor::PerformanceMonitor;
pub use optimizer::{generate_confidence_grid, ParameterOptimizer};
pub use types::*;
