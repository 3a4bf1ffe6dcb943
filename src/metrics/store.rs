//! SQLite-backed time series of run-level performance records.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{ModelPerformance, PerformanceRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Aggregates over a time range of the metrics series.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub runs: usize,
    pub total_cost_nanodollars: i64,
    pub avg_success_rate: f64,
    /// Mean of per-run average quality; `None` when no run had one.
    pub avg_quality_score: Option<f64>,
    pub avg_task_complexity: f64,
}

/// Append-only metrics store on SQLite (WAL mode). All database work runs
/// on the blocking pool; the connection is shared behind a mutex.
#[derive(Clone)]
pub struct SqliteMetricsStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetricsStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS run_metrics (\
               run_id TEXT PRIMARY KEY,\
               timestamp_ms INTEGER NOT NULL,\
               prompt TEXT NOT NULL,\
               per_engine TEXT NOT NULL,\
               total_cost_nanodollars INTEGER NOT NULL,\
               total_time_ms INTEGER NOT NULL,\
               success_rate REAL NOT NULL,\
               avg_quality_score REAL,\
               task_complexity REAL NOT NULL\
             );\
             CREATE INDEX IF NOT EXISTS idx_run_metrics_ts \
               ON run_metrics (timestamp_ms);",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHORUS_METRICS_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".chorus_metrics.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take an exclusive lock file next to the database, for callers that
    /// coordinate multiple writers on one machine.
    pub fn lock_exclusive(&self) -> Result<StoreLock, StoreError> {
        StoreLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    /// Append one record. Re-appending the same run_id replaces the row,
    /// keeping the series one-record-per-run.
    pub async fn append(&self, record: &PerformanceRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let per_engine = serde_json::to_string(&record.per_engine)
                .map_err(|e| StoreError::Serde(e.to_string()))?;
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO run_metrics (\
                        run_id, timestamp_ms, prompt, per_engine,\
                        total_cost_nanodollars, total_time_ms,\
                        success_rate, avg_quality_score, task_complexity\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(run_id) DO UPDATE SET \
                        timestamp_ms = excluded.timestamp_ms,\
                        prompt = excluded.prompt,\
                        per_engine = excluded.per_engine,\
                        total_cost_nanodollars = excluded.total_cost_nanodollars,\
                        total_time_ms = excluded.total_time_ms,\
                        success_rate = excluded.success_rate,\
                        avg_quality_score = excluded.avg_quality_score,\
                        task_complexity = excluded.task_complexity",
                    params![
                        record.run_id,
                        record.timestamp.timestamp_millis(),
                        record.prompt,
                        per_engine,
                        record.total_cost_nanodollars,
                        record.total_time_ms as i64,
                        record.success_rate,
                        record.avg_quality_score,
                        record.task_complexity,
                    ],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Records at or after `since`, newest first.
    pub async fn records_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, StoreError> {
        let store = self.clone();
        let since_ms = since.timestamp_millis();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT run_id, timestamp_ms, prompt, per_engine,\
                            total_cost_nanodollars, total_time_ms,\
                            success_rate, avg_quality_score, task_complexity \
                     FROM run_metrics \
                     WHERE timestamp_ms >= ?1 \
                     ORDER BY timestamp_ms DESC",
                )?;
                let mut rows = stmt.query(params![since_ms])?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    let per_engine_json: String = row.get(3)?;
                    let per_engine: Vec<ModelPerformance> =
                        serde_json::from_str(&per_engine_json)
                            .map_err(|e| StoreError::Serde(e.to_string()))?;
                    let ts_ms: i64 = row.get(1)?;
                    records.push(PerformanceRecord {
                        run_id: row.get(0)?,
                        timestamp: Utc
                            .timestamp_millis_opt(ts_ms)
                            .single()
                            .unwrap_or_else(Utc::now),
                        prompt: row.get(2)?,
                        per_engine,
                        total_cost_nanodollars: row.get(4)?,
                        total_time_ms: row.get::<_, i64>(5)?.max(0) as u64,
                        success_rate: row.get(6)?,
                        avg_quality_score: row.get(7)?,
                        task_complexity: row.get(8)?,
                    });
                }
                Ok(records)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Aggregate the series from `since` onward.
    pub async fn summary(&self, since: DateTime<Utc>) -> Result<MetricsSummary, StoreError> {
        let store = self.clone();
        let since_ms = since.timestamp_millis();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*),\
                            COALESCE(SUM(total_cost_nanodollars), 0),\
                            COALESCE(AVG(success_rate), 0.0),\
                            AVG(avg_quality_score),\
                            COALESCE(AVG(task_complexity), 0.0) \
                     FROM run_metrics WHERE timestamp_ms >= ?1",
                    params![since_ms],
                    |row| {
                        Ok(MetricsSummary {
                            runs: row.get::<_, i64>(0)?.max(0) as usize,
                            total_cost_nanodollars: row.get(1)?,
                            avg_success_rate: row.get(2)?,
                            avg_quality_score: row.get(3)?,
                            avg_task_complexity: row.get(4)?,
                        })
                    },
                )
                .map_err(StoreError::from)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    fn new(db_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}
