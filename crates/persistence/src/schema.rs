//! Database schema definitions

/// SQL to create all tables
///
/// NOTE: ratios and money values are stored as TEXT so Decimal precision and
/// the "inf" profit-factor sentinel survive a round trip
pub const CREATE_TABLES: &str = r#"
-- Exported metrics snapshots, one row per export call
CREATE TABLE IF NOT EXISTS metrics_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exported_at TEXT NOT NULL,
    initial_capital TEXT NOT NULL,
    current_capital TEXT NOT NULL,
    total_return_pct TEXT NOT NULL,
    win_rate TEXT NOT NULL,
    profit_factor TEXT NOT NULL,
    sharpe_ratio TEXT NOT NULL,
    max_drawdown TEXT NOT NULL,
    confidence_threshold TEXT NOT NULL,
    position_size_factor TEXT NOT NULL,
    signal_cooldown TEXT NOT NULL,
    number_of_trades INTEGER NOT NULL DEFAULT 0,
    active_trades INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Parameter optimization history (truncated from the in-memory ring buffer once stored)
CREATE TABLE IF NOT EXISTS parameter_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    optimized_at TEXT NOT NULL,
    confidence_threshold TEXT NOT NULL,
    position_size_factor TEXT NOT NULL,
    signal_cooldown TEXT NOT NULL,
    win_rate TEXT NOT NULL,
    profit_factor TEXT NOT NULL,
    sharpe_ratio TEXT NOT NULL,
    max_drawdown TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_snapshots_exported ON metrics_snapshots(exported_at DESC);
CREATE INDEX IF NOT EXISTS idx_param_history_time ON parameter_history(optimized_at DESC)
"#;

/// `CREATE_TABLES` split into executable statements, comment lines dropped
pub fn statements() -> Vec<String> {
    CREATE_TABLES
        .split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|sql| !sql.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_skip_comments_and_blanks() {
        let statements = statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS metrics_snapshots"));
        assert!(statements.iter().all(|sql| !sql.contains("--")));
    }
}
