//! Monitor store
//!
//! One SQLite file holding every exported metrics snapshot and every
//! parameter change the optimizer made. Rows are append-only; numbers are
//! kept as TEXT so decimal capital and `inf` profit factors survive intact.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Cannot open monitor store at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Monitor schema statement failed ({statement}): {source}")]
    Schema {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{pragma} rejected: {source}")]
    Pragma {
        pragma: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

const PRAGMAS: &[&str] = &[
    // Readers (history command, dashboards) while the monitor appends snapshots
    "PRAGMA journal_mode=WAL",
    "PRAGMA synchronous=NORMAL",
];

/// Handle to the snapshot and parameter-history store
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the store at `path`, creating the file and its directory on
    /// first use
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let open_error = |reason: String| DbError::Open {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| open_error(format!("creating {}: {e}", parent.display())))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .map_err(|e| open_error(e.to_string()))?;

        let db = Self::prepare(pool).await?;
        info!(path = %path.display(), "Monitor store ready");
        Ok(db)
    }

    /// Throwaway store for tests and dry runs
    pub async fn in_memory() -> DbResult<Self> {
        // Every pooled connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DbError::Open {
                path: PathBuf::from(":memory:"),
                reason: e.to_string(),
            })?;

        Self::prepare(pool).await
    }

    async fn prepare(pool: SqlitePool) -> DbResult<Self> {
        let db = Self { pool };
        db.create_schema().await?;
        db.apply_pragmas().await?;
        Ok(db)
    }

    async fn create_schema(&self) -> DbResult<()> {
        for statement in schema::statements() {
            let applied = sqlx::query(&statement).execute(&self.pool).await;
            applied.map_err(|source| DbError::Schema { statement, source })?;
        }
        debug!("Snapshot and parameter-history tables in place");
        Ok(())
    }

    async fn apply_pragmas(&self) -> DbResult<()> {
        for &pragma in PRAGMAS {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|source| DbError::Pragma { pragma, source })?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Owned pool for sinks and handlers that outlive this handle
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_names(db: &Database) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_store_has_both_tables() {
        let db = Database::in_memory().await.unwrap();
        let tables = table_names(&db).await;
        assert!(tables.contains(&"metrics_snapshots".to_string()));
        assert!(tables.contains(&"parameter_history".to_string()));
    }

    #[tokio::test]
    async fn test_file_store_creates_directory_and_reopens() {
        let dir = std::env::temp_dir().join(format!("perf-monitor-store-{}", std::process::id()));
        let path = dir.join("nested").join("monitor.db");

        let first = Database::new(&path).await.unwrap();
        assert!(path.exists());
        first.pool().close().await;

        // Schema creation is repeatable on an existing file
        let reopened = Database::new(&path).await.unwrap();
        assert_eq!(table_names(&reopened).await.len(), 2);
        reopened.pool().close().await;

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
