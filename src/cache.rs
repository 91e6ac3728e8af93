//! Analysis result cache.
//!
//! Completed analyses for remote media are cached so a repeated request can
//! answer without touching any upstream service. The gate semantics live in
//! the pipeline: a failed lookup counts as a miss, and writes are detached
//! tasks observed only for logging.

use crate::error::{GranskaError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Cache key for one (media, instruction) pair.
///
/// Derived from the media ID, the instruction's character count, and its
/// first 50 characters with whitespace removed. Instructions sharing length
/// and prefix map to the same key; the derivation is kept stable so existing
/// rows stay valid.
pub fn fingerprint(media_id: &str, instruction: &str) -> String {
    let prefix: String = instruction
        .chars()
        .take(50)
        .filter(|c| !c.is_whitespace())
        .collect();
    format!("{}_{}_{}", media_id, instruction.chars().count(), prefix)
}

/// Store for completed analyses.
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, media_id: &str, analysis: &str) -> Result<()>;
}

/// SQLite-backed cache.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL so a detached write never blocks a concurrent lookup
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::create_schema(&conn)?;

        info!("Opened analysis cache at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory cache (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_cache (
                cache_key TEXT PRIMARY KEY,
                media_id TEXT NOT NULL,
                analysis TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_cache_media_id ON analysis_cache(media_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GranskaError::Cache(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait]
impl AnalysisCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let analysis = conn
            .query_row(
                "SELECT analysis FROM analysis_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(analysis)
    }

    async fn put(&self, key: &str, media_id: &str, analysis: &str) -> Result<()> {
        let conn = self.lock()?;
        // Last write wins when concurrent runs race on the same key
        conn.execute(
            "INSERT OR REPLACE INTO analysis_cache (cache_key, media_id, analysis, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, media_id, analysis, Utc::now().to_rfc3339()],
        )?;
        debug!("Cached analysis under {}", key);
        Ok(())
    }
}
