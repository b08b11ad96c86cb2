//! Schema for the upload state database, versioned via `PRAGMA user_version`.

use rusqlite::Connection;

use super::error::StateError;

/// Ordered migrations; entry `i` upgrades the database to version `i + 1`.
const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS uploads (
    path TEXT PRIMARY KEY NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    discovered_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    completed_at INTEGER,
    asset_id TEXT,
    album TEXT
);

CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status);

CREATE TABLE IF NOT EXISTS upload_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    files_queued INTEGER DEFAULT 0,
    files_uploaded INTEGER DEFAULT 0,
    files_failed INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#];

/// Version this build writes.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Bring the database up to [`SCHEMA_VERSION`]. Safe to call repeatedly.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }

    for (idx, ddl) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        let target = idx as i32 + 1;
        conn.execute_batch(ddl)?;
        conn.pragma_update(None, "user_version", target)?;
        tracing::debug!("Migrated upload state database to schema version {}", target);
    }

    Ok(())
}
