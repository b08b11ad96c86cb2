//! State database trait and SQLite implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{UploadRecord, UploadRunStats, UploadStatus, UploadSummary};

const RECORD_COLUMNS: &str = "path, size_bytes, status, discovered_at, last_seen_at, attempts, last_error, completed_at, asset_id, album";

/// Upload work-queue persisted between runs.
///
/// Object-safe so the upload engine can hold an `Arc<dyn StateDb>`.
#[async_trait]
pub trait StateDb: Send + Sync {
    /// Record files found by a directory scan.
    ///
    /// New paths are inserted as pending. Known paths keep their status and
    /// only have `size_bytes` / `last_seen_at` refreshed.
    async fn record_discovered(&self, files: &[(PathBuf, u64)]) -> Result<(), StateError>;

    /// Paths that have already been uploaded.
    async fn get_completed_paths(&self) -> Result<HashSet<PathBuf>, StateError>;

    /// The subset of `paths` not yet uploaded, in input order.
    async fn todo(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, StateError> {
        let completed = self.get_completed_paths().await?;
        Ok(paths
            .iter()
            .filter(|p| !completed.contains(*p))
            .cloned()
            .collect())
    }

    async fn get_record(&self, path: &Path) -> Result<Option<UploadRecord>, StateError>;

    /// Mark a file as uploaded, inserting it if it was never discovered.
    async fn mark_completed(
        &self,
        path: &Path,
        asset_id: &str,
        album: Option<&str>,
    ) -> Result<(), StateError>;

    /// Mark a file as failed and bump its attempt counter.
    ///
    /// `asset_id` is set when the file reached iCloud but a later step (the
    /// album link) failed; a known asset id is never cleared by a failure.
    async fn mark_failed(
        &self,
        path: &Path,
        error: &str,
        asset_id: Option<&str>,
    ) -> Result<(), StateError>;

    async fn get_failed(&self) -> Result<Vec<UploadRecord>, StateError>;

    async fn get_pending(&self) -> Result<Vec<UploadRecord>, StateError>;

    /// Move every failed record back to pending. Returns the number reset.
    async fn reset_failed(&self) -> Result<u64, StateError>;

    async fn get_summary(&self) -> Result<UploadSummary, StateError>;

    /// Start a new upload run and return its ID.
    async fn start_run(&self) -> Result<i64, StateError>;

    async fn complete_run(&self, run_id: i64, stats: &UploadRunStats) -> Result<(), StateError>;
}

/// SQLite implementation of the state database.
pub struct SqliteStateDb {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateDb {
    /// Open or create a database at the given path, creating parent
    /// directories as needed.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StateError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        tracing::debug!("Opened upload state database at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an existing database without writing to it: no journal-mode
    /// change and no migration. The schema must already be current.
    pub async fn open_read_only(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(&path_clone, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| StateError::Open {
                    path: path_clone.clone(),
                    source: e,
                })?;
            let version = schema::get_schema_version(&conn)?;
            if version != schema::SCHEMA_VERSION {
                return Err(StateError::UnsupportedSchemaVersion {
                    found: version,
                    expected: schema::SCHEMA_VERSION,
                });
            }
            Ok::<_, StateError>(conn)
        })
        .await??;

        tracing::debug!("Opened upload state database read-only at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }

    fn query_records(
        &self,
        status: UploadStatus,
    ) -> Result<Vec<UploadRecord>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {} FROM uploads WHERE status = ?1 ORDER BY path",
                RECORD_COLUMNS
            ))
            .map_err(StateError::query)?;

        let records = stmt
            .query_map([status.as_str()], |row| Ok(row_to_upload_record(row)))
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        Ok(records)
    }

    fn count_status(conn: &Connection, status: UploadStatus) -> Result<u64, StateError> {
        conn.query_row(
            "SELECT COUNT(*) FROM uploads WHERE status = ?1",
            [status.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(StateError::query)
    }
}

#[async_trait]
impl StateDb for SqliteStateDb {
    async fn record_discovered(&self, files: &[(PathBuf, u64)]) -> Result<(), StateError> {
        if files.is_empty() {
            return Ok(());
        }

        let conn = self.lock()?;
        let now = Utc::now().timestamp();

        conn.execute("BEGIN TRANSACTION", [])
            .map_err(StateError::query)?;

        let result = (|| {
            let mut stmt = conn
                .prepare_cached(
                    r#"
                    INSERT INTO uploads (path, size_bytes, status, discovered_at, last_seen_at)
                    VALUES (?1, ?2, 'pending', ?3, ?3)
                    ON CONFLICT(path) DO UPDATE SET
                        size_bytes = excluded.size_bytes,
                        last_seen_at = excluded.last_seen_at
                    "#,
                )
                .map_err(StateError::query)?;

            for (path, size) in files {
                stmt.execute(rusqlite::params![
                    path.to_string_lossy(),
                    *size as i64,
                    now,
                ])
                .map_err(StateError::query)?;
            }

            Ok::<_, StateError>(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", []).map_err(StateError::query)?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    async fn get_completed_paths(&self) -> Result<HashSet<PathBuf>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT path FROM uploads WHERE status = 'completed'")
            .map_err(StateError::query)?;

        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0).map(PathBuf::from))
            .map_err(StateError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(StateError::query)?;

        Ok(paths)
    }

    async fn get_record(&self, path: &Path) -> Result<Option<UploadRecord>, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM uploads WHERE path = ?1", RECORD_COLUMNS),
            [path.to_string_lossy()],
            |row| Ok(row_to_upload_record(row)),
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn mark_completed(
        &self,
        path: &Path,
        asset_id: &str,
        album: Option<&str>,
    ) -> Result<(), StateError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO uploads (path, status, discovered_at, last_seen_at, completed_at, asset_id, album)
            VALUES (?1, 'completed', ?2, ?2, ?2, ?3, ?4)
            ON CONFLICT(path) DO UPDATE SET
                status = 'completed',
                completed_at = excluded.completed_at,
                asset_id = excluded.asset_id,
                album = excluded.album,
                last_error = NULL
            "#,
            rusqlite::params![path.to_string_lossy(), now, asset_id, album],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        path: &Path,
        error: &str,
        asset_id: Option<&str>,
    ) -> Result<(), StateError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO uploads (path, status, discovered_at, last_seen_at, attempts, last_error, asset_id)
            VALUES (?1, 'failed', ?2, ?2, 1, ?3, ?4)
            ON CONFLICT(path) DO UPDATE SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = excluded.last_error,
                asset_id = COALESCE(excluded.asset_id, uploads.asset_id)
            "#,
            rusqlite::params![path.to_string_lossy(), now, error, asset_id],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn get_failed(&self) -> Result<Vec<UploadRecord>, StateError> {
        self.query_records(UploadStatus::Failed)
    }

    async fn get_pending(&self) -> Result<Vec<UploadRecord>, StateError> {
        self.query_records(UploadStatus::Pending)
    }

    async fn reset_failed(&self) -> Result<u64, StateError> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE uploads SET status = 'pending', attempts = 0, last_error = NULL WHERE status = 'failed'",
                [],
            )
            .map_err(StateError::query)?;

        Ok(rows as u64)
    }

    async fn get_summary(&self) -> Result<UploadSummary, StateError> {
        let conn = self.lock()?;

        let total = conn
            .query_row("SELECT COUNT(*) FROM uploads", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(StateError::query)? as u64;
        let completed = Self::count_status(&conn, UploadStatus::Completed)?;
        let pending = Self::count_status(&conn, UploadStatus::Pending)?;
        let failed = Self::count_status(&conn, UploadStatus::Failed)?;

        let last_run: Option<(Option<i64>, Option<i64>)> = conn
            .query_row(
                "SELECT started_at, completed_at FROM upload_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StateError::query)?;

        let (last_run_started, last_run_completed) = match last_run {
            Some((started, completed)) => (started.and_then(ts_to_utc), completed.and_then(ts_to_utc)),
            None => (None, None),
        };

        Ok(UploadSummary {
            total,
            completed,
            pending,
            failed,
            last_run_started,
            last_run_completed,
        })
    }

    async fn start_run(&self) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO upload_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_run(&self, run_id: i64, stats: &UploadRunStats) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            "UPDATE upload_runs SET completed_at = ?1, files_queued = ?2, files_uploaded = ?3, files_failed = ?4, interrupted = ?5 WHERE id = ?6",
            rusqlite::params![
                completed_at,
                stats.files_queued as i64,
                stats.files_uploaded as i64,
                stats.files_failed as i64,
                i64::from(stats.interrupted),
                run_id
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }
}

fn ts_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

/// Convert a row selected with [`RECORD_COLUMNS`] to an UploadRecord.
fn row_to_upload_record(row: &rusqlite::Row<'_>) -> UploadRecord {
    let path: String = row.get(0).unwrap_or_default();
    let size_bytes: i64 = row.get(1).unwrap_or(0);
    let status_str: String = row.get(2).unwrap_or_default();
    let discovered_at: i64 = row.get(3).unwrap_or(0);
    let last_seen_at: i64 = row.get(4).unwrap_or(0);
    let attempts: i64 = row.get(5).unwrap_or(0);
    let last_error: Option<String> = row.get(6).ok().flatten();
    let completed_at: Option<i64> = row.get(7).ok().flatten();
    let asset_id: Option<String> = row.get(8).ok().flatten();
    let album: Option<String> = row.get(9).ok().flatten();

    UploadRecord {
        path: PathBuf::from(path),
        asset_id,
        album,
        last_error,
        size_bytes: size_bytes.max(0) as u64,
        discovered_at: ts_to_utc(discovered_at).unwrap_or(DateTime::UNIX_EPOCH),
        last_seen_at: ts_to_utc(last_seen_at).unwrap_or(DateTime::UNIX_EPOCH),
        completed_at: completed_at.and_then(ts_to_utc),
        attempts: attempts.max(0) as u32,
        status: UploadStatus::from_str(&status_str).unwrap_or(UploadStatus::Pending),
    }
}
