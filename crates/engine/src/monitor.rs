//! Performance monitor: one ledger, one optimizer and the latest metrics
//! snapshot behind a single lock
//!
//! Trade events can arrive from a broker feed running on another task, so
//! every mutation takes the write lock and every read sees a consistent
//! closed-trade sequence. Nothing here blocks beyond the lock itself.

use chrono::Utc;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::config::{ConfigError, MonitorConfig};
use crate::export::{ExportError, HistorySink, SnapshotSink};
use crate::ledger::{LedgerError, TradeLedger};
use crate::metrics::MetricsAggregator;
use crate::optimizer::ParameterOptimizer;
use crate::types::{
    MetricsExportRecord, OptimizationRecord, ParameterSet, PerformanceSnapshot, TradeEntry,
    TradeExit, TradeRecord,
};

struct MonitorState {
    ledger: TradeLedger,
    snapshot: PerformanceSnapshot,
    optimizer: ParameterOptimizer,
}

impl MonitorState {
    /// Recompute metrics over the last `window_size` closed trades and keep
    /// the result as the current snapshot
    fn recompute(&mut self, window_size: usize) -> PerformanceSnapshot {
        let snapshot = MetricsAggregator::compute(
            self.ledger.window(window_size),
            self.ledger.initial_capital(),
            self.ledger.current_capital(),
            self.snapshot.sharpe_ratio,
        );
        self.snapshot = snapshot.clone();
        snapshot
    }

    fn export_record(&self) -> MetricsExportRecord {
        MetricsExportRecord {
            timestamp: Utc::now(),
            initial_capital: self.ledger.initial_capital(),
            current_capital: self.ledger.current_capital(),
            total_return_pct: self.ledger.total_return_pct(),
            win_rate: self.snapshot.win_rate,
            profit_factor: self.snapshot.profit_factor,
            sharpe_ratio: self.snapshot.sharpe_ratio,
            max_drawdown: self.snapshot.max_drawdown,
            optimal_params: self.optimizer.params(),
            number_of_trades: self.ledger.closed_count(),
            active_trades: self.ledger.active_count(),
        }
    }
}

/// Caller-owned monitor for one strategy run
pub struct PerformanceMonitor {
    config: MonitorConfig,
    state: RwLock<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let state = MonitorState {
            ledger: TradeLedger::new(config.initial_capital),
            snapshot: PerformanceSnapshot::empty(config.initial_capital),
            optimizer: ParameterOptimizer::new(&config),
        };

        info!(
            capital = %config.initial_capital,
            window = config.evaluation_window,
            confidence_threshold = config.confidence_threshold,
            "Performance monitor initialized"
        );

        Ok(Self {
            config,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // A panic while holding the lock cannot leave the ledger half-updated
    // (every mutation completes before returning), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, MonitorState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------------
    // Trade lifecycle
    // ------------------------------------------------------------------------

    /// Record an entry fill. A second entry on a symbol that is already open
    /// is rejected and must be handled by the caller.
    pub fn record_entry(&self, entry: TradeEntry) -> Result<TradeRecord, LedgerError> {
        self.write().ledger.open_trade(entry)
    }

    /// Record an exit fill and refresh the metrics over the evaluation window.
    /// Returns `None` (after logging) when the symbol had no open trade or
    /// the exit was rejected by the ledger.
    pub fn record_exit(&self, exit: TradeExit) -> Option<TradeRecord> {
        let mut state = self.write();
        let closed = state.ledger.close_trade(exit)?;
        let snapshot = state.recompute(self.config.evaluation_window);

        info!(
            win_rate = snapshot.win_rate,
            profit_factor = snapshot.profit_factor,
            sharpe_ratio = snapshot.sharpe_ratio,
            max_drawdown = snapshot.max_drawdown,
            "Performance metrics updated"
        );

        Some(closed)
    }

    // ------------------------------------------------------------------------
    // Metrics & optimization
    // ------------------------------------------------------------------------

    /// Recompute metrics over the last `window_size` closed trades
    pub fn recompute(&self, window_size: usize) -> PerformanceSnapshot {
        self.write().recompute(window_size)
    }

    /// Latest computed snapshot
    pub fn snapshot(&self) -> PerformanceSnapshot {
        self.read().snapshot.clone()
    }

    /// Run one optimization cycle over the last `window_size` closed trades.
    ///
    /// Metrics are recomputed over the same window first, under the same
    /// lock, so the optimizer never sees a partially applied exit.
    pub fn optimize(&self, window_size: usize) -> ParameterSet {
        let mut guard = self.write();
        let state = &mut *guard;

        let total_closed = state.ledger.closed_count();
        if total_closed < window_size {
            return state
                .optimizer
                .optimize(&[], total_closed, window_size, &state.snapshot, Utc::now());
        }

        let metrics = state.recompute(window_size);
        state.optimizer.optimize(
            state.ledger.window(window_size),
            total_closed,
            window_size,
            &metrics,
            Utc::now(),
        )
    }

    /// `optimize` over the configured evaluation window
    pub fn optimize_default(&self) -> ParameterSet {
        self.optimize(self.config.evaluation_window)
    }

    pub fn params(&self) -> ParameterSet {
        self.read().optimizer.params()
    }

    /// Optimization history held in memory, oldest first
    pub fn history(&self) -> Vec<OptimizationRecord> {
        self.read().optimizer.history().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // Ledger views
    // ------------------------------------------------------------------------

    pub fn current_capital(&self) -> rust_decimal::Decimal {
        self.read().ledger.current_capital()
    }

    pub fn closed_trades(&self) -> Vec<TradeRecord> {
        self.read().ledger.closed_trades().to_vec()
    }

    pub fn active_trades(&self) -> Vec<TradeRecord> {
        self.read().ledger.active_trades()
    }

    pub fn closed_count(&self) -> usize {
        self.read().ledger.closed_count()
    }

    // ------------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------------

    /// Current metrics and parameters in export shape
    pub fn export_record(&self) -> MetricsExportRecord {
        self.read().export_record()
    }

    /// Hand the current snapshot to `sink`. The record is built under the
    /// lock, which is released before the sink runs.
    pub async fn export(&self, sink: &dyn SnapshotSink) -> Result<MetricsExportRecord, ExportError> {
        let record = self.export_record();
        if let Err(e) = sink.export(&record).await {
            warn!(error = %e, "Snapshot export failed");
            return Err(e);
        }
        Ok(record)
    }

    /// Persist the in-memory history to `sink`, then drop what was stored.
    /// Entries added while the sink runs stay in memory.
    pub async fn export_history(&self, sink: &dyn HistorySink) -> Result<usize, ExportError> {
        let pending = self.history();
        let Some(last) = pending.last().map(|r| r.sequence) else {
            return Ok(0);
        };

        sink.persist_history(&pending).await?;

        let removed = self.write().optimizer.truncate_history_through(last);
        info!(persisted = pending.len(), removed, "Parameter history exported");
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::MemorySink;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 14, 30, 0).unwrap()
    }

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(MonitorConfig::default()).unwrap()
    }

    fn entry(symbol: &str, at: DateTime<Utc>, price: Decimal, confidence: f64) -> TradeEntry {
        TradeEntry {
            symbol: symbol.to_string(),
            entry_time: at,
            entry_price: price,
            position_size: dec!(10),
            signal_confidence: confidence,
            volatility: 0.01,
        }
    }

    fn exit(symbol: &str, at: DateTime<Utc>, price: Decimal) -> TradeExit {
        TradeExit {
            symbol: symbol.to_string(),
            exit_time: at,
            exit_price: price,
            market_impact: Decimal::ZERO,
        }
    }

    /// Open and close one trade per day starting at `t0`
    fn run_trades(monitor: &PerformanceMonitor, outcomes: &[(f64, Decimal)]) {
        for (i, (confidence, exit_price)) in outcomes.iter().enumerate() {
            let day = t0() + Duration::days(i as i64);
            monitor
                .record_entry(entry("AAPL", day, dec!(100), *confidence))
                .unwrap();
            monitor
                .record_exit(exit("AAPL", day + Duration::minutes(10), *exit_price))
                .unwrap();
        }
    }

    struct FailingSink;

    #[async_trait]
    impl SnapshotSink for FailingSink {
        async fn export(&self, _record: &MetricsExportRecord) -> Result<(), ExportError> {
            Err(ExportError::Rejected("disk full".to_string()))
        }
    }

    #[async_trait]
    impl HistorySink for FailingSink {
        async fn persist_history(&self, _records: &[OptimizationRecord]) -> Result<u64, ExportError> {
            Err(ExportError::Rejected("disk full".to_string()))
        }
    }

    #[test]
    fn test_extreme_profit_factor_keeps_monitor_usable() {
        let monitor = monitor();
        let tiny_loss = TradeEntry {
            position_size: dec!(1),
            ..entry("AAPL", t0(), dec!(1.0000000000000000000001), 0.7)
        };
        monitor.record_entry(tiny_loss).unwrap();
        monitor
            .record_exit(exit("AAPL", t0() + Duration::minutes(5), dec!(1)))
            .unwrap();

        let big_win = TradeEntry {
            position_size: dec!(10000000),
            ..entry("MSFT", t0() + Duration::days(1), dec!(100), 0.7)
        };
        monitor.record_entry(big_win).unwrap();
        let closed_at = t0() + Duration::days(1) + Duration::minutes(5);
        monitor
            .record_exit(exit("MSFT", closed_at, dec!(1100)))
            .unwrap();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.trades_in_window, 2);
        assert_eq!(snapshot.win_rate, 0.5);
        assert!(snapshot.profit_factor > 1e31 && snapshot.profit_factor.is_finite());
        assert_eq!(monitor.closed_count(), 2);
        assert_eq!(monitor.export_record().number_of_trades, 2);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = MonitorConfig {
            evaluation_window: 0,
            ..Default::default()
        };
        assert!(PerformanceMonitor::new(config).is_err());
    }

    #[test]
    fn test_single_trade_scenario() {
        let monitor = monitor();
        monitor
            .record_entry(entry("AAPL", t0(), dec!(100), 0.7))
            .unwrap();
        let closed = monitor
            .record_exit(exit("AAPL", t0() + Duration::hours(1), dec!(110)))
            .unwrap();

        assert_eq!(closed.pnl, Some(dec!(100)));
        assert_eq!(monitor.current_capital(), dec!(100100));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.win_rate, 1.0);
        assert!(snapshot.profit_factor.is_infinite());
        assert_eq!(snapshot.current_capital, dec!(100100));
    }

    #[test]
    fn test_duplicate_entry_leaves_state_unchanged() {
        let monitor = monitor();
        monitor
            .record_entry(entry("AAPL", t0(), dec!(100), 0.7))
            .unwrap();
        let before = monitor.active_trades();

        assert!(monitor
            .record_entry(entry("AAPL", t0(), dec!(90), 0.9))
            .is_err());
        assert_eq!(monitor.active_trades(), before);
    }

    #[test]
    fn test_unmatched_exit_is_absorbed() {
        let monitor = monitor();
        let before = monitor.snapshot();

        assert!(monitor.record_exit(exit("MSFT", t0(), dec!(10))).is_none());
        assert_eq!(monitor.snapshot(), before);
        assert_eq!(monitor.closed_count(), 0);
    }

    #[test]
    fn test_recompute_is_pure() {
        let monitor = monitor();
        run_trades(
            &monitor,
            &[(0.7, dec!(110)), (0.7, dec!(95)), (0.7, dec!(104)), (0.7, dec!(99))],
        );

        let first = monitor.recompute(50);
        let second = monitor.recompute(50);
        assert_eq!(first, second);
        assert_eq!(first.trades_in_window, 4);
    }

    #[test]
    fn test_optimize_below_window_returns_same_params() {
        let monitor = monitor();
        let outcomes: Vec<(f64, Decimal)> = (0..49).map(|_| (0.9, dec!(110))).collect();
        run_trades(&monitor, &outcomes);

        let before = monitor.params();
        assert_eq!(monitor.optimize(50), before);
        assert!(monitor.history().is_empty());
    }

    #[test]
    fn test_optimize_raises_confidence_threshold() {
        let monitor = monitor();
        let mut outcomes: Vec<(f64, Decimal)> = Vec::new();
        // 20 losers at 0.55 and 10 at 0.65, then 30 trades at 0.70 with 24 winners
        outcomes.extend((0..20).map(|_| (0.55, dec!(99))));
        outcomes.extend((0..10).map(|_| (0.65, dec!(99))));
        outcomes.extend((0..30).map(|i| (0.70, if i < 24 { dec!(101) } else { dec!(99) })));
        run_trades(&monitor, &outcomes);

        let params = monitor.optimize(60);
        assert_eq!(params.confidence_threshold(), 0.70);
        assert!(params.confidence_threshold() >= MonitorConfig::default().confidence_threshold);

        let history = monitor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].params, params);
        assert_eq!(history[0].metrics.win_rate, 0.4);
    }

    #[test]
    fn test_optimize_cuts_size_after_drawdown() {
        let monitor = monitor();
        // +2% / -3% days on 100k: the second day draws down well past 2%
        let outcomes: Vec<(f64, Decimal)> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    (0.6, dec!(300))
                } else {
                    (0.6, dec!(-200))
                }
            })
            .collect();
        run_trades(&monitor, &outcomes);

        let snapshot = monitor.recompute(50);
        assert!(snapshot.max_drawdown > 0.02);

        let params = monitor.optimize(50);
        assert_eq!(params.position_size_factor(), 0.8);
        // 10 minute trades: 120s raw cooldown
        assert_eq!(params.signal_cooldown_seconds(), 120.0);
    }

    #[test]
    fn test_concurrent_feed_keeps_capital_consistent() {
        let monitor = Arc::new(monitor());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || {
                    let symbol = format!("SYM{worker}");
                    for i in 0..25 {
                        let at = t0() + Duration::minutes(i);
                        monitor
                            .record_entry(entry(&symbol, at, dec!(100), 0.7))
                            .unwrap();
                        let price = if i % 3 == 0 { dec!(97) } else { dec!(102) };
                        monitor.record_exit(exit(&symbol, at + Duration::seconds(30), price));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let realized: Decimal = monitor.closed_trades().iter().filter_map(|t| t.pnl).sum();
        assert_eq!(monitor.closed_count(), 100);
        assert_eq!(monitor.current_capital(), dec!(100000) + realized);
    }

    #[tokio::test]
    async fn test_export_builds_record() {
        let monitor = monitor();
        run_trades(&monitor, &[(0.7, dec!(110))]);
        monitor
            .record_entry(entry("MSFT", t0(), dec!(50), 0.8))
            .unwrap();

        let sink = MemorySink::new();
        let record = monitor.export(&sink).await.unwrap();

        assert_eq!(record.initial_capital, dec!(100000));
        assert_eq!(record.current_capital, dec!(100100));
        assert_eq!(record.total_return_pct, dec!(0.1));
        assert_eq!(record.number_of_trades, 1);
        assert_eq!(record.active_trades, 1);
        assert_eq!(sink.snapshots(), vec![record]);
    }

    #[tokio::test]
    async fn test_failed_export_keeps_state() {
        let monitor = monitor();
        run_trades(&monitor, &[(0.7, dec!(110)), (0.7, dec!(90))]);
        let snapshot = monitor.snapshot();
        let params = monitor.params();

        let err = monitor.export(&FailingSink).await.unwrap_err();
        assert!(matches!(err, ExportError::Rejected(_)));
        assert_eq!(monitor.snapshot(), snapshot);
        assert_eq!(monitor.params(), params);
        assert_eq!(monitor.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_export_history_then_truncate() {
        let monitor = monitor();
        let outcomes: Vec<(f64, Decimal)> = (0..50).map(|_| (0.6, dec!(101))).collect();
        run_trades(&monitor, &outcomes);
        monitor.optimize(50);
        monitor.optimize(50);

        // A failing sink keeps the entries
        assert!(monitor.export_history(&FailingSink).await.is_err());
        assert_eq!(monitor.history().len(), 2);

        let sink = MemorySink::new();
        assert_eq!(monitor.export_history(&sink).await.unwrap(), 2);
        assert!(monitor.history().is_empty());
        assert_eq!(sink.history().len(), 2);

        assert_eq!(monitor.export_history(&sink).await.unwrap(), 0);
    }
}
