use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::data::{ImageRecord, ImageUpdate};
use crate::error::FrameResult;

/// Prefix of the filename a record carries until its file is written.
pub const PENDING_PREFIX: &str = "pending-";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The ImageStore manages one panel's table in the SQLite database.
///
/// It never holds a connection: every operation opens its own, uses it,
/// and drops it, so the store can be cloned freely into request handlers
/// and the panel worker.
#[derive(Clone)]
pub struct ImageStore {
    db_path: PathBuf,
    table: &'static str,
}

/// Outcome of a startup consistency pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records left behind by an interrupted upload
    pub pending_removed: usize,
    /// Records whose file disappeared, now inactive
    pub deactivated: usize,
    /// Files in the media directory without a record
    pub orphans_removed: usize,
}

impl ImageStore {
    /// Open the store, creating the database file and the table if needed.
    ///
    /// `table` is a fixed identifier chosen by the panel kind, never user input.
    pub fn open(db_path: impl Into<PathBuf>, table: &'static str) -> FrameResult<Self> {
        let db_path = db_path.into();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = ImageStore { db_path, table };
        store.init_schema()?;

        info!(table, path = %store.db_path.display(), "📁 Image store ready");
        Ok(store)
    }

    fn connect(&self) -> SqlResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Create the table and its indexes if they don't exist.
    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                filename    TEXT NOT NULL UNIQUE,
                url         TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                is_active   INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_{table}_active ON {table}(is_active);",
            table = self.table
        ))
    }

    fn map_row(row: &Row<'_>) -> SqlResult<ImageRecord> {
        let millis: i64 = row.get(3)?;
        Ok(ImageRecord {
            id: row.get(0)?,
            filename: row.get(1)?,
            url: row.get(2)?,
            created_at: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
            active: row.get(4)?,
        })
    }

    /// List records, newest first. `Some(flag)` filters on the active flag.
    pub fn list(&self, active: Option<bool>) -> SqlResult<Vec<ImageRecord>> {
        let conn = self.connect()?;
        let columns = "id, filename, url, created_at, is_active";

        let images = match active {
            Some(flag) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM {} WHERE is_active = ?1 ORDER BY created_at DESC, id DESC",
                    self.table
                ))?;
                let rows = stmt.query_map([flag], Self::map_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM {} ORDER BY created_at DESC, id DESC",
                    self.table
                ))?;
                let rows = stmt.query_map([], Self::map_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
        };

        Ok(images)
    }

    pub fn get(&self, id: i64) -> SqlResult<Option<ImageRecord>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT id, filename, url, created_at, is_active FROM {} WHERE id = ?1",
                self.table
            ),
            [id],
            Self::map_row,
        )
        .optional()
    }

    /// Insert a new record and return it with its assigned id
    pub fn create(&self, filename: &str, url: &str, active: bool) -> SqlResult<ImageRecord> {
        let created_at = Utc::now();
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (filename, url, created_at, is_active) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![filename, url, created_at.timestamp_millis(), active],
        )?;

        Ok(ImageRecord {
            id: conn.last_insert_rowid(),
            filename: filename.to_string(),
            url: url.to_string(),
            created_at: DateTime::from_timestamp_millis(created_at.timestamp_millis())
                .unwrap_or(created_at),
            active,
        })
    }

    /// Apply a partial update. Returns the updated record, or `None` if the id is unknown.
    pub fn update(&self, id: i64, update: &ImageUpdate) -> SqlResult<Option<ImageRecord>> {
        if !update.is_empty() {
            let conn = self.connect()?;
            conn.execute(
                &format!(
                    "UPDATE {} SET
                        filename = COALESCE(?1, filename),
                        url = COALESCE(?2, url),
                        is_active = COALESCE(?3, is_active)
                     WHERE id = ?4",
                    self.table
                ),
                params![update.filename, update.url, update.active, id],
            )?;
        }
        self.get(id)
    }

    /// Delete a record. Returns whether a row was removed.
    pub fn delete(&self, id: i64) -> SqlResult<bool> {
        let conn = self.connect()?;
        let removed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", self.table), [id])?;
        Ok(removed > 0)
    }

    /// Bring the table and the media directory back in line after a restart.
    ///
    /// Must run before any upload is accepted: a pending record belonging to
    /// a live upload would be removed.
    pub fn reconcile(&self, media_dir: &Path) -> SqlResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let records = self.list(None)?;
        let mut known = HashSet::new();

        for record in records {
            if record.filename.starts_with(PENDING_PREFIX) {
                self.delete(record.id)?;
                report.pending_removed += 1;
                continue;
            }

            if !media_dir.join(&record.filename).exists() && record.active {
                self.update(record.id, &ImageUpdate::active(false))?;
                report.deactivated += 1;
            }
            known.insert(record.filename);
        }

        for entry in WalkDir::new(media_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if known.contains(&*name) {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => report.orphans_removed += 1,
                Err(e) => warn!(file = %path.display(), error = %e, "⚠️  Could not remove orphaned file"),
            }
        }

        if report != ReconcileReport::default() {
            info!(
                table = self.table,
                pending = report.pending_removed,
                deactivated = report.deactivated,
                orphans = report.orphans_removed,
                "🔄 Reconciled image store"
            );
        }

        Ok(report)
    }
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("db_path", &self.db_path)
            .field("table", &self.table)
            .finish()
    }
}
