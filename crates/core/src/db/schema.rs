//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "local version table",
        r#"
        CREATE TABLE IF NOT EXISTS local_versions (
            server_item_key             TEXT PRIMARY KEY,
            source_server_item          TEXT    NOT NULL,
            kind                        TEXT    NOT NULL
                CHECK (kind IN ('populated', 'initially_deleted', 'move_uncommitted')),
            item_id                     INTEGER NOT NULL,
            target_local_item           TEXT,
            local_version               INTEGER NOT NULL,
            send_to_server              INTEGER NOT NULL DEFAULT 1,
            baseline_file_id            BLOB,
            baseline_hash               BLOB,
            baseline_length             INTEGER NOT NULL DEFAULT -1,
            download_url                TEXT,
            pending_change_target_item  TEXT,
            local_version_date          INTEGER NOT NULL DEFAULT -1,
            encoding                    INTEGER NOT NULL DEFAULT 0,
            new_target_server_item      TEXT,
            source_local_item           TEXT,
            updated_at                  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_local_versions_item_id ON local_versions (item_id);
        "#,
    ),
];

/// Schema version a fully migrated store reports.
pub const LATEST_VERSION: u32 = 1;

/// The stored `user_version`.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Apply every migration newer than the stored `user_version`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    debug!(current, "current schema version");

    for (version, description, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        info!(version, description, "applying migration");
        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::MigrationFailed {
                version: *version,
                detail: e.to_string(),
            })?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", version))?;
    }

    Ok(())
}
