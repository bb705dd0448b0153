//! SQLite-backed store for visualizer configs, processing status and derived files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{
    NewProcessedFile, ProcessedFile, ProcessingState, ProcessingStatus, VisualizerConfig,
};

/// Thread-safe handle to the visualizer database.
///
/// Request-path code uses `lock_sync`; the processing worker goes through
/// `call`, which runs on tokio's blocking pool so SQLite I/O never ties up
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<VisualizeDb>>,
}

impl DbHandle {
    pub fn new(db: VisualizeDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open an in-memory database wrapped in a handle (for tests).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(VisualizeDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&VisualizeDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, VisualizeDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct VisualizeDb {
    conn: Connection,
}

const CONFIG_COLUMNS: &str = "id, name, shortname, active, priority, mime_types, extensions, \
     processing_mime_types, processing_extensions, processing_status_exclude, icon, \
     description, options, visualizer";

const FILE_COLUMNS: &str = "id, resource_id, config_id, filename, query_param, source_hash, \
     storage_key, complete, created_at";

/// Raw row before JSON list columns are decoded.
struct ConfigRow {
    id: i64,
    name: String,
    shortname: String,
    active: bool,
    priority: i64,
    mime_types: String,
    extensions: String,
    processing_mime_types: String,
    processing_extensions: String,
    processing_status_exclude: String,
    icon: Option<String>,
    description: Option<String>,
    options: String,
    visualizer: String,
}

impl ConfigRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            shortname: row.get(2)?,
            active: row.get(3)?,
            priority: row.get(4)?,
            mime_types: row.get(5)?,
            extensions: row.get(6)?,
            processing_mime_types: row.get(7)?,
            processing_extensions: row.get(8)?,
            processing_status_exclude: row.get(9)?,
            icon: row.get(10)?,
            description: row.get(11)?,
            options: row.get(12)?,
            visualizer: row.get(13)?,
        })
    }

    fn into_config(self) -> Result<VisualizerConfig> {
        let list = |raw: &str, column: &str| -> Result<Vec<String>> {
            serde_json::from_str(raw)
                .with_context(|| format!("Invalid JSON in column {} for '{}'", column, self.shortname))
        };
        let options: BTreeMap<String, String> = serde_json::from_str(&self.options)
            .with_context(|| format!("Invalid options JSON for '{}'", self.shortname))?;
        Ok(VisualizerConfig {
            id: self.id,
            mime_types: list(&self.mime_types, "mime_types")?,
            extensions: list(&self.extensions, "extensions")?,
            processing_mime_types: list(&self.processing_mime_types, "processing_mime_types")?,
            processing_extensions: list(&self.processing_extensions, "processing_extensions")?,
            processing_status_exclude: list(
                &self.processing_status_exclude,
                "processing_status_exclude",
            )?,
            name: self.name,
            shortname: self.shortname,
            active: self.active,
            priority: self.priority,
            icon: self.icon,
            description: self.description,
            options,
            visualizer: self.visualizer,
        })
    }
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedFile> {
    Ok(ProcessedFile {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        config_id: row.get(2)?,
        filename: row.get(3)?,
        query_param: row.get(4)?,
        source_hash: row.get(5)?,
        storage_key: row.get(6)?,
        complete: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl VisualizeDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS visualizer_configs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    shortname TEXT NOT NULL UNIQUE,
                    active INTEGER NOT NULL DEFAULT 1,
                    priority INTEGER NOT NULL DEFAULT 0,
                    mime_types TEXT NOT NULL DEFAULT '[]',
                    extensions TEXT NOT NULL DEFAULT '[]',
                    processing_mime_types TEXT NOT NULL DEFAULT '[]',
                    processing_extensions TEXT NOT NULL DEFAULT '[]',
                    processing_status_exclude TEXT NOT NULL DEFAULT '[]',
                    icon TEXT,
                    description TEXT,
                    options TEXT NOT NULL DEFAULT '{}',
                    visualizer TEXT NOT NULL DEFAULT 'iframe',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS processing_status (
                    resource_id TEXT NOT NULL,
                    config_id INTEGER NOT NULL REFERENCES visualizer_configs(id) ON DELETE CASCADE,
                    status TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (resource_id, config_id)
                );

                CREATE TABLE IF NOT EXISTS processed_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    resource_id TEXT NOT NULL,
                    config_id INTEGER NOT NULL REFERENCES visualizer_configs(id) ON DELETE CASCADE,
                    filename TEXT NOT NULL,
                    query_param TEXT NOT NULL,
                    source_hash TEXT NOT NULL,
                    storage_key TEXT NOT NULL,
                    complete INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_configs_active ON visualizer_configs(active, priority);
                CREATE INDEX IF NOT EXISTS idx_files_resource ON processed_files(resource_id, config_id);
                CREATE INDEX IF NOT EXISTS idx_files_hash ON processed_files(config_id, source_hash, query_param);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Visualizer configs ────────────────────────────────────────────

    /// Insert a config, or update the existing row with the same shortname.
    ///
    /// Updates keep the original row id so registration order, and with it
    /// the tie-break among equal priorities, is stable across re-uploads.
    pub fn upsert_config(&self, config: &VisualizerConfig) -> Result<VisualizerConfig> {
        let to_json = |v: &Vec<String>| serde_json::to_string(v).context("Failed to encode list");
        self.conn
            .execute(
                "INSERT INTO visualizer_configs (name, shortname, active, priority, mime_types, extensions,
                     processing_mime_types, processing_extensions, processing_status_exclude, icon,
                     description, options, visualizer)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(shortname) DO UPDATE SET
                     name = excluded.name,
                     active = excluded.active,
                     priority = excluded.priority,
                     mime_types = excluded.mime_types,
                     extensions = excluded.extensions,
                     processing_mime_types = excluded.processing_mime_types,
                     processing_extensions = excluded.processing_extensions,
                     processing_status_exclude = excluded.processing_status_exclude,
                     icon = excluded.icon,
                     description = excluded.description,
                     options = excluded.options,
                     visualizer = excluded.visualizer,
                     updated_at = datetime('now')",
                params![
                    config.name,
                    config.shortname,
                    config.active,
                    config.priority,
                    to_json(&config.mime_types)?,
                    to_json(&config.extensions)?,
                    to_json(&config.processing_mime_types)?,
                    to_json(&config.processing_extensions)?,
                    to_json(&config.processing_status_exclude)?,
                    config.icon,
                    config.description,
                    serde_json::to_string(&config.options).context("Failed to encode options")?,
                    config.visualizer,
                ],
            )
            .context("Failed to upsert visualizer config")?;
        self.get_config_by_shortname(&config.shortname)?
            .context("Visualizer config not found after upsert")
    }

    pub fn get_config(&self, id: i64) -> Result<Option<VisualizerConfig>> {
        let sql = format!("SELECT {} FROM visualizer_configs WHERE id = ?1", CONFIG_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], ConfigRow::from_row)
            .optional()
            .context("Failed to query visualizer config")?;
        row.map(ConfigRow::into_config).transpose()
    }

    pub fn get_config_by_shortname(&self, shortname: &str) -> Result<Option<VisualizerConfig>> {
        let sql = format!(
            "SELECT {} FROM visualizer_configs WHERE shortname = ?1",
            CONFIG_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![shortname], ConfigRow::from_row)
            .optional()
            .context("Failed to query visualizer config")?;
        row.map(ConfigRow::into_config).transpose()
    }

    /// All configs, registration order.
    pub fn list_configs(&self) -> Result<Vec<VisualizerConfig>> {
        let sql = format!("SELECT {} FROM visualizer_configs ORDER BY id", CONFIG_COLUMNS);
        self.query_configs(&sql)
    }

    /// Active configs by descending priority, registration order within a priority.
    pub fn list_active_configs(&self) -> Result<Vec<VisualizerConfig>> {
        let sql = format!(
            "SELECT {} FROM visualizer_configs WHERE active = 1 ORDER BY priority DESC, id ASC",
            CONFIG_COLUMNS
        );
        self.query_configs(&sql)
    }

    fn query_configs(&self, sql: &str) -> Result<Vec<VisualizerConfig>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare config query")?;
        let rows = stmt
            .query_map([], ConfigRow::from_row)
            .context("Failed to query visualizer configs")?;
        let mut configs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read visualizer config row")?;
            configs.push(r.into_config()?);
        }
        Ok(configs)
    }

    pub fn set_config_active(&self, shortname: &str, active: bool) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE visualizer_configs SET active = ?1, updated_at = datetime('now') WHERE shortname = ?2",
                params![active, shortname],
            )
            .context("Failed to update visualizer config")?;
        Ok(changed > 0)
    }

    /// Delete a config; status and derived file rows cascade.
    pub fn delete_config(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM visualizer_configs WHERE id = ?1", params![id])
            .context("Failed to delete visualizer config")?;
        Ok(changed > 0)
    }

    // ── Processing status ─────────────────────────────────────────────

    pub fn get_status(&self, resource_id: &str, config_id: i64) -> Result<Option<ProcessingStatus>> {
        let row = self
            .conn
            .query_row(
                "SELECT resource_id, config_id, status, updated_at FROM processing_status
                 WHERE resource_id = ?1 AND config_id = ?2",
                params![resource_id, config_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query processing status")?;
        match row {
            Some((resource_id, config_id, status, updated_at)) => {
                let status = status.parse::<ProcessingState>().map_err(|e| anyhow::anyhow!(e))?;
                Ok(Some(ProcessingStatus {
                    resource_id,
                    config_id,
                    status,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn set_status(&self, resource_id: &str, config_id: i64, status: ProcessingState) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO processing_status (resource_id, config_id, status) VALUES (?1, ?2, ?3)
                 ON CONFLICT(resource_id, config_id) DO UPDATE SET
                     status = excluded.status, updated_at = datetime('now')",
                params![resource_id, config_id, status.as_str()],
            )
            .context("Failed to set processing status")?;
        Ok(())
    }

    /// Create a `loading` status only if none exists. Returns `true` if created.
    pub fn create_status_if_missing(&self, resource_id: &str, config_id: i64) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO processing_status (resource_id, config_id, status) VALUES (?1, ?2, ?3)",
                params![resource_id, config_id, ProcessingState::Loading.as_str()],
            )
            .context("Failed to create processing status")?;
        Ok(inserted > 0)
    }

    // ── Processed files ───────────────────────────────────────────────

    pub fn insert_processed_file(&self, file: &NewProcessedFile) -> Result<ProcessedFile> {
        self.conn
            .execute(
                "INSERT INTO processed_files (resource_id, config_id, filename, query_param, source_hash, storage_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    file.resource_id,
                    file.config_id,
                    file.filename,
                    file.query_param,
                    file.source_hash,
                    file.storage_key
                ],
            )
            .context("Failed to insert processed file")?;
        let id = self.conn.last_insert_rowid();
        self.get_processed_file(id)?
            .context("Processed file not found after insert")
    }

    pub fn get_processed_file(&self, id: i64) -> Result<Option<ProcessedFile>> {
        let sql = format!("SELECT {} FROM processed_files WHERE id = ?1", FILE_COLUMNS);
        self.conn
            .query_row(&sql, params![id], file_from_row)
            .optional()
            .context("Failed to query processed file")
    }

    pub fn mark_processed_file_complete(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE processed_files SET complete = 1 WHERE id = ?1",
                params![id],
            )
            .context("Failed to mark processed file complete")?;
        Ok(())
    }

    pub fn list_processed_files(&self, resource_id: &str, config_id: i64) -> Result<Vec<ProcessedFile>> {
        let sql = format!(
            "SELECT {} FROM processed_files WHERE resource_id = ?1 AND config_id = ?2 ORDER BY id",
            FILE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_processed_files")?;
        let rows = stmt
            .query_map(params![resource_id, config_id], file_from_row)
            .context("Failed to query processed files")?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.context("Failed to read processed file row")?);
        }
        Ok(files)
    }

    /// All derived files owned by a config, for storage cleanup before deletion.
    pub fn list_processed_files_for_config(&self, config_id: i64) -> Result<Vec<ProcessedFile>> {
        let sql = format!(
            "SELECT {} FROM processed_files WHERE config_id = ?1 ORDER BY id",
            FILE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_processed_files_for_config")?;
        let rows = stmt
            .query_map(params![config_id], file_from_row)
            .context("Failed to query processed files")?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.context("Failed to read processed file row")?);
        }
        Ok(files)
    }

    /// A completed file from another resource derived from identical source bytes.
    pub fn find_duplicate(
        &self,
        config_id: i64,
        query_param: &str,
        source_hash: &str,
        exclude_resource: &str,
    ) -> Result<Option<ProcessedFile>> {
        let sql = format!(
            "SELECT {} FROM processed_files
             WHERE config_id = ?1 AND query_param = ?2 AND source_hash = ?3
               AND resource_id != ?4 AND complete = 1
             ORDER BY id LIMIT 1",
            FILE_COLUMNS
        );
        self.conn
            .query_row(
                &sql,
                params![config_id, query_param, source_hash, exclude_resource],
                file_from_row,
            )
            .optional()
            .context("Failed to query duplicate processed file")
    }

    pub fn delete_processed_file(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM processed_files WHERE id = ?1", params![id])
            .context("Failed to delete processed file")?;
        Ok(())
    }

    /// Remove every derived file record and status for a resource.
    /// Returns the removed file records so their bytes can be deleted.
    pub fn delete_resource(&self, resource_id: &str) -> Result<Vec<ProcessedFile>> {
        let sql = format!(
            "SELECT {} FROM processed_files WHERE resource_id = ?1 ORDER BY id",
            FILE_COLUMNS
        );
        let files = {
            let mut stmt = self
                .conn
                .prepare(&sql)
                .context("Failed to prepare delete_resource")?;
            let rows = stmt
                .query_map(params![resource_id], file_from_row)
                .context("Failed to query resource files")?;
            let mut files = Vec::new();
            for row in rows {
                files.push(row.context("Failed to read processed file row")?);
            }
            files
        };
        self.conn
            .execute(
                "DELETE FROM processed_files WHERE resource_id = ?1",
                params![resource_id],
            )
            .context("Failed to delete resource files")?;
        self.conn
            .execute(
                "DELETE FROM processing_status WHERE resource_id = ?1",
                params![resource_id],
            )
            .context("Failed to delete resource status")?;
        Ok(files)
    }

    // ── Settings (shared cache) ───────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read setting")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .context("Failed to write setting")?;
        Ok(())
    }
}
