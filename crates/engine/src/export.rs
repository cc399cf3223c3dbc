//! Snapshot export sinks
//!
//! The monitor only builds the payload; where it ends up is decided by the
//! injected sink. A failed export is returned to the caller and never
//! touches monitor state.

use async_trait::async_trait;
use persistence::repository::{MetricsSnapshotRecord, ParameterChangeRecord, SnapshotRepository};
use persistence::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use crate::types::{MetricsExportRecord, OptimizationRecord};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize metrics: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database export failed: {0}")]
    Database(#[from] persistence::DbError),

    #[error("Sink rejected export: {0}")]
    Rejected(String),
}

/// Destination for metrics snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn export(&self, record: &MetricsExportRecord) -> Result<(), ExportError>;
}

/// Destination for optimizer history (export-then-truncate)
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Persist `records`, returning how many were stored
    async fn persist_history(&self, records: &[OptimizationRecord]) -> Result<u64, ExportError>;
}

// ============================================================================
// JSON file
// ============================================================================

/// Writes each snapshot as pretty JSON, replacing the previous file
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ExportError {
        ExportError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl SnapshotSink for JsonFileSink {
    async fn export(&self, record: &MetricsExportRecord) -> Result<(), ExportError> {
        let body = serde_json::to_vec_pretty(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| self.io_error(e))?;

        info!(path = %self.path.display(), "Metrics saved");
        Ok(())
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Appends snapshots and parameter history to the SQLite store
#[derive(Clone)]
pub struct SqliteSnapshotSink {
    pool: SqlitePool,
}

impl SqliteSnapshotSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotSink for SqliteSnapshotSink {
    async fn export(&self, record: &MetricsExportRecord) -> Result<(), ExportError> {
        let repo = SnapshotRepository::new(&self.pool);
        let id = repo.save_snapshot(&snapshot_row(record)).await?;
        info!(id, trades = record.number_of_trades, "Snapshot stored");
        Ok(())
    }
}

#[async_trait]
impl HistorySink for SqliteSnapshotSink {
    async fn persist_history(&self, records: &[OptimizationRecord]) -> Result<u64, ExportError> {
        let rows: Vec<ParameterChangeRecord> = records.iter().map(history_row).collect();
        let repo = SnapshotRepository::new(&self.pool);
        Ok(repo.save_parameter_changes(&rows).await?)
    }
}

/// Flatten an export record into its TEXT-column row
pub fn snapshot_row(record: &MetricsExportRecord) -> MetricsSnapshotRecord {
    MetricsSnapshotRecord {
        id: None,
        exported_at: record.timestamp.to_rfc3339(),
        initial_capital: record.initial_capital.to_string(),
        current_capital: record.current_capital.to_string(),
        total_return_pct: record.total_return_pct.to_string(),
        win_rate: record.win_rate.to_string(),
        profit_factor: record.profit_factor.to_string(),
        sharpe_ratio: record.sharpe_ratio.to_string(),
        max_drawdown: record.max_drawdown.to_string(),
        confidence_threshold: record.optimal_params.confidence_threshold().to_string(),
        position_size_factor: record.optimal_params.position_size_factor().to_string(),
        signal_cooldown: record.optimal_params.signal_cooldown_seconds().to_string(),
        number_of_trades: record.number_of_trades as i64,
        active_trades: record.active_trades as i64,
    }
}

pub fn history_row(record: &OptimizationRecord) -> ParameterChangeRecord {
    ParameterChangeRecord {
        id: None,
        optimized_at: record.timestamp.to_rfc3339(),
        confidence_threshold: record.params.confidence_threshold().to_string(),
        position_size_factor: record.params.position_size_factor().to_string(),
        signal_cooldown: record.params.signal_cooldown_seconds().to_string(),
        win_rate: record.metrics.win_rate.to_string(),
        profit_factor: record.metrics.profit_factor.to_string(),
        sharpe_ratio: record.metrics.sharpe_ratio.to_string(),
        max_drawdown: record.metrics.max_drawdown.to_string(),
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Collects exports in memory
#[derive(Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<MetricsExportRecord>>,
    history: Mutex<Vec<OptimizationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<MetricsExportRecord> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn history(&self) -> Vec<OptimizationRecord> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    async fn export(&self, record: &MetricsExportRecord) -> Result<(), ExportError> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl HistorySink for MemorySink {
    async fn persist_history(&self, records: &[OptimizationRecord]) -> Result<u64, ExportError> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.extend_from_slice(records);
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricsSummary, ParameterSet};
    use chrono::{TimeZone, Utc};
    use persistence::Database;
    use rust_decimal_macros::dec;

    fn record() -> MetricsExportRecord {
        MetricsExportRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 16, 0, 0).unwrap(),
            initial_capital: dec!(100000),
            current_capital: dec!(100100),
            total_return_pct: dec!(0.1),
            win_rate: 1.0,
            profit_factor: f64::INFINITY,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            optimal_params: ParameterSet::initial(0.6),
            number_of_trades: 1,
            active_trades: 0,
        }
    }

    fn history_entry(sequence: u64) -> OptimizationRecord {
        OptimizationRecord {
            sequence,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 16, 0, 0).unwrap(),
            params: ParameterSet::clamped(0.7, 0.8, 120.0),
            metrics: MetricsSummary {
                win_rate: 0.4,
                profit_factor: 0.9,
                sharpe_ratio: -0.3,
                max_drawdown: 0.03,
            },
        }
    }

    #[tokio::test]
    async fn test_json_file_sink_writes_export_shape() {
        let dir = std::env::temp_dir().join(format!("perf-monitor-test-{}", std::process::id()));
        let sink = JsonFileSink::new(dir.join("nested").join("metrics.json"));

        sink.export(&record()).await.unwrap();

        let raw = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["initial_capital"], "100000");
        assert_eq!(json["current_capital"], "100100");
        assert_eq!(json["profit_factor"], "inf");
        assert_eq!(json["optimal_params"]["signal_cooldown"], 60.0);
        assert_eq!(json["number_of_trades"], 1);
        assert_eq!(json["active_trades"], 0);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_json_file_sink_reports_io_failure() {
        // A directory cannot be overwritten as a file
        let dir = std::env::temp_dir();
        let sink = JsonFileSink::new(&dir);
        let err = sink.export(&record()).await.unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_sink_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let sink = SqliteSnapshotSink::new(db.pool_clone());

        sink.export(&record()).await.unwrap();
        let stored = sink
            .persist_history(&[history_entry(0), history_entry(1)])
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let repo = SnapshotRepository::new(db.pool());
        let snapshots = repo.recent_snapshots(5).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].profit_factor, "inf");
        assert_eq!(snapshots[0].confidence_threshold, "0.6");

        let history = repo.parameter_history(5).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].position_size_factor, "0.8");
        assert_eq!(history[0].signal_cooldown, "120");
    }

    #[test]
    fn test_rows_use_plain_number_text() {
        let row = snapshot_row(&record());
        assert_eq!(row.exported_at, "2026-01-05T16:00:00+00:00");
        assert_eq!(row.total_return_pct, "0.1");
        assert_eq!(row.win_rate, "1");
        assert_eq!(row.signal_cooldown, "60");
    }
}
