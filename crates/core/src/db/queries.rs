//! Typed query helpers for the `local_versions` table.
//!
//! The free functions take a `&Connection` so they can run inside
//! [`Database::transaction`]; the `Database` methods lock and delegate.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::{DatabaseError, VersionError};
use crate::models::fold_path;
use crate::version::{Baseline, VersionRecord, VersionRow};

/// Stored in integer columns when a length or date is unknown.
pub const UNKNOWN: i64 = -1;

const SELECT_COLUMNS: &str = "source_server_item, kind, item_id, target_local_item, \
     local_version, send_to_server, baseline_file_id, baseline_hash, baseline_length, \
     download_url, pending_change_target_item, local_version_date, encoding, \
     new_target_server_item, source_local_item";

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Insert or replace the row for `record`'s source server item.
pub fn upsert_local_version(
    conn: &Connection,
    record: &VersionRecord,
) -> Result<(), DatabaseError> {
    let row = record.row();
    let now = Utc::now().to_rfc3339();
    let empty = Baseline::default();
    let baseline = record.baseline().unwrap_or(&empty);
    let (new_target, source_local) = match record {
        VersionRecord::MoveUncommitted {
            new_target_server_item,
            source_local_item,
            ..
        } => (
            Some(new_target_server_item.as_str()),
            Some(source_local_item.as_str()),
        ),
        _ => (None, None),
    };

    conn.execute(
        "INSERT OR REPLACE INTO local_versions (
            server_item_key, source_server_item, kind, item_id, target_local_item,
            local_version, send_to_server, baseline_file_id, baseline_hash, baseline_length,
            download_url, pending_change_target_item, local_version_date, encoding,
            new_target_server_item, source_local_item, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            fold_path(&row.source_server_item),
            row.source_server_item,
            record.kind(),
            row.item_id,
            row.target_local_item,
            row.local_version,
            record.is_send_to_server(),
            baseline.baseline_file_id.map(|id| id.as_bytes().to_vec()),
            baseline.baseline_hash,
            baseline.baseline_length.unwrap_or(UNKNOWN),
            baseline.download_url,
            baseline.pending_change_target_item,
            baseline
                .local_version_date
                .map(|d| d.timestamp_millis())
                .unwrap_or(UNKNOWN),
            baseline.encoding,
            new_target,
            source_local,
            now,
        ],
    )?;
    debug!(
        server_item = %row.source_server_item,
        kind = record.kind(),
        local_version = row.local_version,
        "upserted local version"
    );
    Ok(())
}

/// Delete the row for `server_item`. Returns whether a row existed.
pub fn delete_local_version(conn: &Connection, server_item: &str) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM local_versions WHERE server_item_key = ?1",
        params![fold_path(server_item)],
    )?;
    debug!(server_item, deleted, "deleted local version");
    Ok(deleted > 0)
}

/// Columns as read back from SQLite, before variant reconstruction.
struct StoredRow {
    source_server_item: String,
    kind: String,
    item_id: i32,
    target_local_item: Option<String>,
    local_version: i32,
    send_to_server: bool,
    baseline_file_id: Option<Vec<u8>>,
    baseline_hash: Option<Vec<u8>>,
    baseline_length: i64,
    download_url: Option<String>,
    pending_change_target_item: Option<String>,
    local_version_date: i64,
    encoding: i32,
    new_target_server_item: Option<String>,
    source_local_item: Option<String>,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_server_item: row.get(0)?,
            kind: row.get(1)?,
            item_id: row.get(2)?,
            target_local_item: row.get(3)?,
            local_version: row.get(4)?,
            send_to_server: row.get(5)?,
            baseline_file_id: row.get(6)?,
            baseline_hash: row.get(7)?,
            baseline_length: row.get(8)?,
            download_url: row.get(9)?,
            pending_change_target_item: row.get(10)?,
            local_version_date: row.get(11)?,
            encoding: row.get(12)?,
            new_target_server_item: row.get(13)?,
            source_local_item: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<VersionRecord, VersionError> {
        let baseline_file_id = match self.baseline_file_id {
            Some(bytes) => Some(Uuid::from_slice(&bytes).map_err(|e| {
                VersionError::InvalidBaselineId {
                    server_item: self.source_server_item.clone(),
                    detail: e.to_string(),
                }
            })?),
            None => None,
        };
        let row = VersionRow {
            source_server_item: self.source_server_item,
            item_id: self.item_id,
            target_local_item: self.target_local_item,
            local_version: self.local_version,
        };
        let baseline = Baseline {
            baseline_file_id,
            baseline_hash: self.baseline_hash,
            baseline_length: (self.baseline_length != UNKNOWN).then_some(self.baseline_length),
            download_url: self.download_url,
            pending_change_target_item: self.pending_change_target_item,
            local_version_date: decode_date(self.local_version_date),
            encoding: self.encoding,
        };

        match self.kind.as_str() {
            "populated" => Ok(VersionRecord::Populated {
                row,
                send_to_server: self.send_to_server,
                baseline,
            }),
            "initially_deleted" => Ok(VersionRecord::InitiallyDeleted {
                row,
                send_to_server: self.send_to_server,
                baseline,
            }),
            "move_uncommitted" => Ok(VersionRecord::MoveUncommitted {
                row,
                new_target_server_item: self.new_target_server_item.unwrap_or_default(),
                source_local_item: self.source_local_item.unwrap_or_default(),
            }),
            other => Err(VersionError::UnknownKind(other.to_string())),
        }
    }
}

fn decode_date(millis: i64) -> Option<DateTime<Utc>> {
    if millis == UNKNOWN {
        None
    } else {
        DateTime::from_timestamp_millis(millis)
    }
}

// ---------------------------------------------------------------------------
// Database methods
// ---------------------------------------------------------------------------

impl Database {
    /// Insert or replace a local version row.
    pub fn upsert_local_version(&self, record: &VersionRecord) -> Result<(), DatabaseError> {
        upsert_local_version(&self.conn(), record)
    }

    /// Look up the row for `server_item` (case-insensitive).
    pub fn get_local_version(
        &self,
        server_item: &str,
    ) -> Result<Option<VersionRecord>, DatabaseError> {
        let conn = self.conn();
        let stored = conn
            .query_row(
                &format!(
                    "SELECT {} FROM local_versions WHERE server_item_key = ?1",
                    SELECT_COLUMNS
                ),
                params![fold_path(server_item)],
                StoredRow::read,
            )
            .optional()?;
        Ok(stored.map(StoredRow::into_record).transpose()?)
    }

    /// Every row, ordered by server item.
    pub fn list_local_versions(&self) -> Result<Vec<VersionRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM local_versions ORDER BY server_item_key",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], StoredRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        let records = rows
            .into_iter()
            .map(StoredRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Delete the row for `server_item`. Returns whether a row existed.
    pub fn delete_local_version(&self, server_item: &str) -> Result<bool, DatabaseError> {
        delete_local_version(&self.conn(), server_item)
    }

    pub fn count_local_versions(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM local_versions", [], |row| row.get(0))?;
        Ok(count)
    }
}
