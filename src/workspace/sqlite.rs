//! SqliteWorkspace - SQLite-backed local workspace.
//!
//! Collections are stored as JSON bodies next to their sync marker so the
//! sync services can diff against the last known remote state without
//! touching the remote.

use super::model::{Collection, CollectionRecord, Environment, SyncState};
use super::WorkspaceStore;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Workspace database (workspace.db).
pub struct SqliteWorkspace {
    conn: Mutex<Connection>,
}

impl SqliteWorkspace {
    /// Open or create the workspace database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Cannot open workspace database: {}", db_path.display()))?;

        // WAL lets the UI read while a sync writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        info!("[Workspace] Opened {}", db_path.display());
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open database in memory (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Workspace database lock poisoned: {}", e))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                file_shas TEXT NOT NULL DEFAULT '{}',
                commit_sha TEXT,
                locally_modified INTEGER NOT NULL DEFAULT 0,
                last_synced INTEGER
            );

            CREATE TABLE IF NOT EXISTS environments (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                variables TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_environments_name ON environments(name);

            CREATE TABLE IF NOT EXISTS sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                action TEXT NOT NULL,
                details TEXT
            );
        ",
        )?;
        Ok(())
    }

    /// Log a sync action.
    pub fn log_sync(&self, action: &str, details: Option<&str>) -> Result<()> {
        let now = Utc::now().timestamp();
        self.conn()?.execute(
            "INSERT INTO sync_log (timestamp, action, details) VALUES (?1, ?2, ?3)",
            params![now, action, details],
        )?;
        Ok(())
    }

    /// Most recent sync log entries, newest first.
    pub fn recent_sync_log(&self, limit: usize) -> Result<Vec<(DateTime<Utc>, String, Option<String>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, action, details FROM sync_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let ts: i64 = row.get(0)?;
            Ok((
                DateTime::from_timestamp(ts, 0).unwrap_or_default(),
                row.get(1)?,
                row.get(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

/// Raw collection row before JSON decoding.
struct CollectionRow {
    body: String,
    file_shas: String,
    commit_sha: Option<String>,
    locally_modified: bool,
    last_synced: Option<i64>,
}

impl CollectionRow {
    const COLUMNS: &'static str = "body, file_shas, commit_sha, locally_modified, last_synced";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            body: row.get(0)?,
            file_shas: row.get(1)?,
            commit_sha: row.get(2)?,
            locally_modified: row.get::<_, i64>(3)? != 0,
            last_synced: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<CollectionRecord> {
        let collection: Collection =
            serde_json::from_str(&self.body).context("Corrupt collection body")?;
        let file_shas: BTreeMap<String, String> =
            serde_json::from_str(&self.file_shas).context("Corrupt collection file_shas")?;
        Ok(CollectionRecord {
            collection,
            sync: SyncState {
                file_shas,
                commit_sha: self.commit_sha,
                locally_modified: self.locally_modified,
                last_synced_at: self
                    .last_synced
                    .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            },
        })
    }
}

impl WorkspaceStore for SqliteWorkspace {
    fn list_collections(&self) -> Result<Vec<CollectionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM collections ORDER BY id",
            CollectionRow::COLUMNS
        ))?;
        let rows = stmt.query_map([], CollectionRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    fn get_collection(&self, id: &str) -> Result<Option<CollectionRecord>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM collections WHERE id = ?1",
                    CollectionRow::COLUMNS
                ),
                params![id],
                CollectionRow::from_row,
            )
            .optional()?;

        row.map(CollectionRow::into_record).transpose()
    }

    fn upsert_collection(&self, collection: &Collection, state: &SyncState) -> Result<()> {
        let body = serde_json::to_string(collection)?;
        let file_shas = serde_json::to_string(&state.file_shas)?;
        self.conn()?.execute(
            "INSERT INTO collections
                (id, name, body, file_shas, commit_sha, locally_modified, last_synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, body = excluded.body,
                file_shas = excluded.file_shas, commit_sha = excluded.commit_sha,
                locally_modified = excluded.locally_modified,
                last_synced = excluded.last_synced",
            params![
                collection.id,
                collection.name,
                body,
                file_shas,
                state.commit_sha,
                state.locally_modified as i64,
                state.last_synced_at.map(|t| t.timestamp()),
            ],
        )?;
        Ok(())
    }

    fn update_sync_state(&self, id: &str, state: &SyncState) -> Result<()> {
        let file_shas = serde_json::to_string(&state.file_shas)?;
        let changed = self.conn()?.execute(
            "UPDATE collections SET
                file_shas = ?2, commit_sha = ?3, locally_modified = ?4, last_synced = ?5
             WHERE id = ?1",
            params![
                id,
                file_shas,
                state.commit_sha,
                state.locally_modified as i64,
                state.last_synced_at.map(|t| t.timestamp()),
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Unknown collection: {}", id);
        }
        Ok(())
    }

    fn save_local_edit(&self, collection: &Collection) -> Result<()> {
        let body = serde_json::to_string(collection)?;
        self.conn()?.execute(
            "INSERT INTO collections (id, name, body, locally_modified)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, body = excluded.body, locally_modified = 1",
            params![collection.id, collection.name, body],
        )?;
        Ok(())
    }

    fn list_environments(&self) -> Result<Vec<Environment>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, variables FROM environments ORDER BY name, id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut envs = Vec::new();
        for row in rows {
            let (id, name, variables) = row?;
            let variables = serde_json::from_str(&variables)
                .with_context(|| format!("Corrupt variables for environment {}", name))?;
            envs.push(Environment {
                id,
                name,
                variables,
            });
        }
        Ok(envs)
    }

    fn upsert_environment(&self, environment: &Environment) -> Result<()> {
        let variables = serde_json::to_string(&environment.variables)?;
        self.conn()?.execute(
            "INSERT INTO environments (id, name, variables) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, variables = excluded.variables",
            params![environment.id, environment.name, variables],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ApiRequest;
    use tempfile::TempDir;

    fn sample_collection() -> Collection {
        Collection::new("c1", "Users").with_request(ApiRequest {
            id: "r1".to_string(),
            name: "List users".to_string(),
            method: "GET".to_string(),
            url: "https://api.example.com/users".to_string(),
            headers: BTreeMap::new(),
            body: None,
        })
    }

    #[test]
    fn test_upsert_and_get_collection() -> Result<()> {
        let db = SqliteWorkspace::open_in_memory()?;
        let mut shas = BTreeMap::new();
        shas.insert("apisync/collections/c1/collection.json".to_string(), "abc".to_string());
        let state = SyncState::synced(shas, Some("commit1".to_string()));

        db.upsert_collection(&sample_collection(), &state)?;

        let record = db.get_collection("c1")?.unwrap();
        assert_eq!(record.collection, sample_collection());
        assert_eq!(record.sync.commit_sha.as_deref(), Some("commit1"));
        assert_eq!(record.sync.file_shas.len(), 1);
        assert!(!record.sync.locally_modified);
        assert!(record.sync.last_synced_at.is_some());
        Ok(())
    }

    #[test]
    fn test_local_edit_sets_marker_and_keeps_state() -> Result<()> {
        let db = SqliteWorkspace::open_in_memory()?;
        db.upsert_collection(
            &sample_collection(),
            &SyncState::synced(BTreeMap::new(), Some("commit1".to_string())),
        )?;

        let mut edited = sample_collection();
        edited.name = "Users (edited)".to_string();
        db.save_local_edit(&edited)?;

        let record = db.get_collection("c1")?.unwrap();
        assert!(record.sync.locally_modified);
        assert_eq!(record.sync.commit_sha.as_deref(), Some("commit1"));
        assert_eq!(record.collection.name, "Users (edited)");
        Ok(())
    }

    #[test]
    fn test_local_edit_creates_unsynced_collection() -> Result<()> {
        let db = SqliteWorkspace::open_in_memory()?;
        db.save_local_edit(&sample_collection())?;

        let all = db.list_collections()?;
        assert_eq!(all.len(), 1);
        assert!(all[0].sync.locally_modified);
        assert!(!all[0].sync.has_synced());
        Ok(())
    }

    #[test]
    fn test_update_sync_state_requires_existing_row() -> Result<()> {
        let db = SqliteWorkspace::open_in_memory()?;
        assert!(db.update_sync_state("nope", &SyncState::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_environments_roundtrip_on_disk() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("workspace.db");

        let env = Environment::new("staging").with_variable("API_KEY", "s3cr3t");
        {
            let db = SqliteWorkspace::open(&path)?;
            db.upsert_environment(&env)?;
            db.log_sync("vault_push", Some("1 environment"))?;
        }

        let db = SqliteWorkspace::open(&path)?;
        let envs = db.list_environments()?;
        assert_eq!(envs, vec![env]);
        let log = db.recent_sync_log(5)?;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].1, "vault_push");
        Ok(())
    }
}
