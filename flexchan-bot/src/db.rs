//! SQLite-backed registry store.
//!
//! One row per workspace holding the full record list as JSON. `set` is an
//! upsert that replaces the list wholesale. Uses WAL mode so reads made while
//! a write is in flight do not block.

use std::path::Path;

use async_trait::async_trait;
use flexchan_core::store::{RegistryStore, StoreError};
use flexchan_core::ChannelGroup;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS registry (
                workspace_id TEXT PRIMARY KEY,
                records_json TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );
            ",
        )
    }

    /// When the workspace's list was last written (RFC 3339).
    pub fn updated_at(&self, workspace_id: &str) -> SqlResult<Option<String>> {
        self.conn
            .lock()
            .query_row(
                "SELECT updated_at FROM registry WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
            .optional()
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn get(&self, workspace_id: &str) -> Result<Option<Vec<ChannelGroup>>, StoreError> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT records_json FROM registry WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| {
                StoreError::Serialization(format!("records for {workspace_id}: {e}"))
            })
        })
        .transpose()
    }

    async fn set(&self, workspace_id: &str, records: Vec<ChannelGroup>) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(&records).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .lock()
            .execute(
                "INSERT INTO registry (workspace_id, records_json, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(workspace_id) DO UPDATE SET
                    records_json=excluded.records_json,
                    updated_at=excluded.updated_at",
                params![workspace_id, json, now],
            )
            .map_err(backend)?;
        tracing::debug!(workspace = %workspace_id, records = records.len(), "Stored registry");
        Ok(())
    }

    async fn workspaces(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT workspace_id FROM registry ORDER BY workspace_id")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?;
        rows.collect::<SqlResult<Vec<_>>>().map_err(backend)
    }
}
