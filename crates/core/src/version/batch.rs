//! Scoped batch of local version updates for one reconciliation pass.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{queries, Database};
use crate::errors::DatabaseError;
use crate::models::paths_equal;

use super::VersionRecord;

/// One row of the update-local-version call sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLocalVersionUpdate {
    pub item_id: i32,
    /// `None` tells the server the item left the workspace.
    pub target_local_item: Option<String>,
    pub local_version: i32,
}

/// Counts from a [`LocalVersionUpdates::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub upserted: usize,
    pub deleted: usize,
}

/// Records queued during one pass and written to the local table together.
///
/// Records queued for the same server item replace each other. Dropping the
/// batch without calling [`flush`](Self::flush) discards the queued records
/// and leaves the store untouched.
#[derive(Debug, Default)]
pub struct LocalVersionUpdates {
    records: Vec<VersionRecord>,
    /// Server items whose rows are replaced under a new key.
    removals: Vec<String>,
    flushed: bool,
}

impl LocalVersionUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `record`, replacing any queued record for the same item.
    pub fn queue(&mut self, record: VersionRecord) {
        let existing = self.records.iter_mut().find(|queued| {
            paths_equal(queued.source_server_item(), record.source_server_item())
        });
        match existing {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
    }

    /// Queue removal of the row stored under `server_item`. The server is
    /// not told; use a record without a target local item for that.
    pub fn queue_removal(&mut self, server_item: impl Into<String>) {
        let server_item = server_item.into();
        if !self.removals.iter().any(|queued| paths_equal(queued, &server_item)) {
            self.removals.push(server_item);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.removals.is_empty()
    }

    pub fn records(&self) -> &[VersionRecord] {
        &self.records
    }

    /// Rows eligible for the update-local-version call, in queue order.
    pub fn server_updates(&self) -> Vec<ServerLocalVersionUpdate> {
        self.records
            .iter()
            .filter(|r| r.is_send_to_server())
            .map(|r| ServerLocalVersionUpdate {
                item_id: r.row().item_id,
                target_local_item: r.row().target_local_item.clone(),
                local_version: r.local_version(),
            })
            .collect()
    }

    /// Write every queued change in one transaction. Removals run first;
    /// then rows without a target local item are removed and the rest are
    /// upserted.
    pub fn flush(mut self, db: &Database) -> Result<FlushStats, DatabaseError> {
        let records = std::mem::take(&mut self.records);
        let removals = std::mem::take(&mut self.removals);
        self.flushed = true;

        let stats = db.transaction(|conn| {
            let mut stats = FlushStats::default();
            for server_item in &removals {
                if queries::delete_local_version(conn, server_item)? {
                    stats.deleted += 1;
                }
            }
            for record in &records {
                if record.target_local_item().is_none() {
                    if queries::delete_local_version(conn, record.source_server_item())? {
                        stats.deleted += 1;
                    }
                } else {
                    queries::upsert_local_version(conn, record)?;
                    stats.upserted += 1;
                }
            }
            Ok(stats)
        })?;

        info!(
            upserted = stats.upserted,
            deleted = stats.deleted,
            "flushed local version updates"
        );
        Ok(stats)
    }
}

impl Drop for LocalVersionUpdates {
    fn drop(&mut self) {
        if !self.flushed && !self.is_empty() {
            debug!(
                count = self.len(),
                "discarding unflushed local version updates"
            );
        }
    }
}
