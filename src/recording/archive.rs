// src/recording/archive.rs
//! Durable record archive on SQLite
//!
//! One row per finished record. Columns the panel filters on are stored
//! plainly; the full record is kept as zstd-compressed JSON in `payload`.

use crate::record::{RecordId, RequestRecord};
use crate::recording::compressor::{CompressionLevel, Compressor};
use crate::utils::config::ArchiveConfig;
use crate::utils::errors::{EngineError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Archived row without its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedSummary {
    pub id: String,
    pub sequence: u64,
    pub tab: u64,
    pub state: String,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub replay_of: Option<String>,
    pub archived_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveStats {
    pub records: u64,
    pub payload_bytes: u64,
}

pub struct RecordArchive {
    path: PathBuf,
    db: Arc<Mutex<Connection>>,
    compressor: Compressor,
}

impl RecordArchive {
    /// Open (or create) the archive described by `config`
    pub async fn open(config: &ArchiveConfig) -> Result<Self> {
        fs::create_dir_all(&config.base_dir).await.map_err(|e| {
            EngineError::StorageFailed(format!("Failed to create directory: {}", e))
        })?;

        let path = config.base_dir.join(&config.db_name);
        let conn = Connection::open(&path).map_err(|e| {
            EngineError::StorageFailed(format!("Failed to open database: {}", e))
        })?;

        let archive = Self {
            path,
            db: Arc::new(Mutex::new(conn)),
            compressor: Compressor::new(config.compression),
        };
        archive.init_schema().await?;

        info!("Record archive opened at {:?}", archive.path);
        Ok(archive)
    }

    /// In-memory archive, mostly for tests
    pub async fn in_memory(level: CompressionLevel) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            EngineError::StorageFailed(format!("Failed to open database: {}", e))
        })?;
        let archive = Self {
            path: PathBuf::from(":memory:"),
            db: Arc::new(Mutex::new(conn)),
            compressor: Compressor::new(level),
        };
        archive.init_schema().await?;
        Ok(archive)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL,
                tab INTEGER NOT NULL,
                state TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER,
                replay_of TEXT,
                archived_at INTEGER NOT NULL,
                payload BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_order ON records(archived_at, sequence);
            CREATE INDEX IF NOT EXISTS idx_records_tab ON records(tab);
            "#,
        )
        .map_err(|e| EngineError::StorageFailed(format!("Schema creation failed: {}", e)))
    }

    /// Write records in one transaction; rewriting an id replaces its row
    pub async fn write_batch(&self, records: &[Arc<RequestRecord>]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.push((record, self.compressor.pack(record.as_ref())?));
        }

        let archived_at = chrono::Utc::now().timestamp_millis();
        let mut db = self.db.lock().await;
        let tx = db
            .transaction()
            .map_err(|e| EngineError::StorageFailed(format!("Failed to begin batch: {}", e)))?;

        for (record, payload) in &rows {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO records
                    (id, sequence, tab, state, method, url, status, replay_of, archived_at, payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    record.id.to_string(),
                    record.sequence as i64,
                    record.origin.tab as i64,
                    record.state.as_str(),
                    record.method(),
                    record.url(),
                    record.status().map(i64::from),
                    record.replay_of.map(|id| id.to_string()),
                    archived_at,
                    payload,
                ],
            )
            .map_err(|e| EngineError::StorageFailed(format!("Failed to archive record: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| EngineError::StorageFailed(format!("Failed to commit batch: {}", e)))?;

        debug!("Archived {} records", rows.len());
        Ok(rows.len())
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<RequestRecord>> {
        let payload: Option<Vec<u8>> = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT payload FROM records WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngineError::StorageFailed(format!("Lookup failed: {}", e)))?
        };

        payload
            .map(|bytes| self.compressor.unpack(&bytes))
            .transpose()
    }

    /// Most recent summaries first
    pub async fn list(&self, limit: usize) -> Result<Vec<ArchivedSummary>> {
        let db = self.db.lock().await;

        let mut stmt = db
            .prepare(
                r#"
                SELECT id, sequence, tab, state, method, url, status, replay_of, archived_at
                FROM records
                ORDER BY archived_at DESC, sequence DESC
                LIMIT ?1
                "#,
            )
            .map_err(|e| EngineError::StorageFailed(format!("Query preparation failed: {}", e)))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ArchivedSummary {
                    id: row.get(0)?,
                    sequence: row.get::<_, i64>(1)? as u64,
                    tab: row.get::<_, i64>(2)? as u64,
                    state: row.get(3)?,
                    method: row.get(4)?,
                    url: row.get(5)?,
                    status: row.get::<_, Option<i64>>(6)?.map(|s| s as u16),
                    replay_of: row.get(7)?,
                    archived_at: row.get(8)?,
                })
            })
            .map_err(|e| EngineError::StorageFailed(format!("Query execution failed: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::StorageFailed(format!("Result collection failed: {}", e)))?;

        Ok(rows)
    }

    /// Every archived record, oldest first
    pub async fn load_all(&self) -> Result<Vec<RequestRecord>> {
        let payloads: Vec<Vec<u8>> = {
            let db = self.db.lock().await;
            let mut stmt = db
                .prepare("SELECT payload FROM records ORDER BY archived_at, sequence")
                .map_err(|e| {
                    EngineError::StorageFailed(format!("Query preparation failed: {}", e))
                })?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| EngineError::StorageFailed(format!("Query execution failed: {}", e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    EngineError::StorageFailed(format!("Result collection failed: {}", e))
                })?;
            rows
        };

        payloads
            .iter()
            .map(|bytes| self.compressor.unpack(bytes))
            .collect()
    }

    pub async fn stats(&self) -> Result<ArchiveStats> {
        let db = self.db.lock().await;
        let (records, payload_bytes): (i64, i64) = db
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM records",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| EngineError::StorageFailed(format!("Stats query failed: {}", e)))?;

        Ok(ArchiveStats {
            records: records as u64,
            payload_bytes: payload_bytes as u64,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
