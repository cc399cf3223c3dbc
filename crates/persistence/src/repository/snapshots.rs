//! Snapshot repository: exported metrics and parameter history

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted metrics export
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricsSnapshotRecord {
    pub id: Option<i64>,
    /// RFC 3339 export time
    pub exported_at: String,
    pub initial_capital: String,
    pub current_capital: String,
    pub total_return_pct: String,
    pub win_rate: String,
    /// Decimal string, or "inf" when the window had no losing trade
    pub profit_factor: String,
    pub sharpe_ratio: String,
    pub max_drawdown: String,
    pub confidence_threshold: String,
    pub position_size_factor: String,
    pub signal_cooldown: String,
    pub number_of_trades: i64,
    pub active_trades: i64,
}

/// A persisted optimizer history entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParameterChangeRecord {
    pub id: Option<i64>,
    pub optimized_at: String,
    pub confidence_threshold: String,
    pub position_size_factor: String,
    pub signal_cooldown: String,
    pub win_rate: String,
    pub profit_factor: String,
    pub sharpe_ratio: String,
    pub max_drawdown: String,
}

/// Repository for metrics snapshots and parameter history
pub struct SnapshotRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a metrics snapshot, returning its row id
    pub async fn save_snapshot(&self, record: &MetricsSnapshotRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics_snapshots (
                exported_at, initial_capital, current_capital, total_return_pct,
                win_rate, profit_factor, sharpe_ratio, max_drawdown,
                confidence_threshold, position_size_factor, signal_cooldown,
                number_of_trades, active_trades
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.exported_at)
        .bind(&record.initial_capital)
        .bind(&record.current_capital)
        .bind(&record.total_return_pct)
        .bind(&record.win_rate)
        .bind(&record.profit_factor)
        .bind(&record.sharpe_ratio)
        .bind(&record.max_drawdown)
        .bind(&record.confidence_threshold)
        .bind(&record.position_size_factor)
        .bind(&record.signal_cooldown)
        .bind(record.number_of_trades)
        .bind(record.active_trades)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent snapshots first
    pub async fn recent_snapshots(&self, limit: i64) -> DbResult<Vec<MetricsSnapshotRecord>> {
        let records = sqlx::query_as::<_, MetricsSnapshotRecord>(
            r#"
            SELECT id, exported_at, initial_capital, current_capital, total_return_pct,
                   win_rate, profit_factor, sharpe_ratio, max_drawdown,
                   confidence_threshold, position_size_factor, signal_cooldown,
                   number_of_trades, active_trades
            FROM metrics_snapshots
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count_snapshots(&self) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metrics_snapshots")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Append a batch of parameter changes in one transaction
    pub async fn save_parameter_changes(&self, records: &[ParameterChangeRecord]) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO parameter_history (
                    optimized_at, confidence_threshold, position_size_factor, signal_cooldown,
                    win_rate, profit_factor, sharpe_ratio, max_drawdown
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.optimized_at)
            .bind(&record.confidence_threshold)
            .bind(&record.position_size_factor)
            .bind(&record.signal_cooldown)
            .bind(&record.win_rate)
            .bind(&record.profit_factor)
            .bind(&record.sharpe_ratio)
            .bind(&record.max_drawdown)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Most recent parameter changes first
    pub async fn parameter_history(&self, limit: i64) -> DbResult<Vec<ParameterChangeRecord>> {
        let records = sqlx::query_as::<_, ParameterChangeRecord>(
            r#"
            SELECT id, optimized_at, confidence_threshold, position_size_factor, signal_cooldown,
                   win_rate, profit_factor, sharpe_ratio, max_drawdown
            FROM parameter_history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
