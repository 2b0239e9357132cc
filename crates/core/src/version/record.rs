//! Local version rows.
//!
//! A [`VersionRecord`] is one row of the workspace's local version table. The
//! three variants differ in which population sources they accept; asking a
//! variant to populate itself from a source it does not support is a caller
//! bug and fails with [`VersionError::UnsupportedOperation`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::VersionError;
use crate::models::{Item, PendingChange};

// ---------------------------------------------------------------------------
// Row data
// ---------------------------------------------------------------------------

/// Fields shared by every variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRow {
    pub source_server_item: String,
    pub item_id: i32,
    /// `None` removes the row from the local table on the next flush.
    pub target_local_item: Option<String>,
    /// 0 for uncommitted items (pending add or branch).
    pub local_version: i32,
}

/// Baseline metadata of a populated row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub baseline_file_id: Option<Uuid>,
    pub baseline_hash: Option<Vec<u8>>,
    pub baseline_length: Option<i64>,
    pub download_url: Option<String>,
    pub pending_change_target_item: Option<String>,
    pub local_version_date: Option<DateTime<Utc>>,
    pub encoding: i32,
}

/// Where a record is being populated from.
#[derive(Debug, Clone, Copy)]
pub enum UpdateSource<'a> {
    /// A server item description.
    Item(&'a Item),
    /// An existing local version record for the same item.
    LocalVersion(&'a VersionRecord),
    /// A pending change on the item.
    PendingChange(&'a PendingChange),
}

impl UpdateSource<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Item(_) => "a server item",
            Self::LocalVersion(_) => "an existing local version",
            Self::PendingChange(_) => "a pending change",
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One local version row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionRecord {
    /// A regular row whose baseline is filled in from server or local data.
    Populated {
        row: VersionRow,
        send_to_server: bool,
        baseline: Baseline,
    },
    /// An item deleted before it was ever populated. Only its baseline can
    /// still change, and only from a pending change.
    InitiallyDeleted {
        row: VersionRow,
        send_to_server: bool,
        baseline: Baseline,
    },
    /// An in-flight rename of an uncommitted item. Never sent to the server.
    MoveUncommitted {
        row: VersionRow,
        new_target_server_item: String,
        source_local_item: String,
    },
}

impl VersionRecord {
    /// A row that will be populated from server or local data.
    pub fn populated(
        source_server_item: impl Into<String>,
        item_id: i32,
        target_local_item: Option<String>,
        local_version: i32,
    ) -> Self {
        Self::Populated {
            row: VersionRow {
                source_server_item: source_server_item.into(),
                item_id,
                target_local_item,
                local_version,
            },
            send_to_server: true,
            baseline: Baseline::default(),
        }
    }

    /// A row for an item deleted before population. It has no local item.
    pub fn initially_deleted(
        source_server_item: impl Into<String>,
        item_id: i32,
        local_version: i32,
    ) -> Self {
        Self::InitiallyDeleted {
            row: VersionRow {
                source_server_item: source_server_item.into(),
                item_id,
                target_local_item: None,
                local_version,
            },
            send_to_server: true,
            baseline: Baseline::default(),
        }
    }

    /// A rename of an uncommitted item from `source_server_item` to
    /// `new_target_server_item`.
    pub fn move_uncommitted(
        source_server_item: impl Into<String>,
        item_id: i32,
        new_target_server_item: impl Into<String>,
        source_local_item: impl Into<String>,
        target_local_item: Option<String>,
    ) -> Self {
        Self::MoveUncommitted {
            row: VersionRow {
                source_server_item: source_server_item.into(),
                item_id,
                target_local_item,
                local_version: 0,
            },
            new_target_server_item: new_target_server_item.into(),
            source_local_item: source_local_item.into(),
        }
    }

    /// Short name of the variant, also used as the persisted `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Populated { .. } => "populated",
            Self::InitiallyDeleted { .. } => "initially_deleted",
            Self::MoveUncommitted { .. } => "move_uncommitted",
        }
    }

    pub fn row(&self) -> &VersionRow {
        match self {
            Self::Populated { row, .. }
            | Self::InitiallyDeleted { row, .. }
            | Self::MoveUncommitted { row, .. } => row,
        }
    }

    pub fn row_mut(&mut self) -> &mut VersionRow {
        match self {
            Self::Populated { row, .. }
            | Self::InitiallyDeleted { row, .. }
            | Self::MoveUncommitted { row, .. } => row,
        }
    }

    /// Baseline metadata; `None` for uncommitted moves.
    pub fn baseline(&self) -> Option<&Baseline> {
        match self {
            Self::Populated { baseline, .. } | Self::InitiallyDeleted { baseline, .. } => {
                Some(baseline)
            }
            Self::MoveUncommitted { .. } => None,
        }
    }

    pub fn source_server_item(&self) -> &str {
        &self.row().source_server_item
    }

    pub fn target_local_item(&self) -> Option<&str> {
        self.row().target_local_item.as_deref()
    }

    pub fn local_version(&self) -> i32 {
        self.row().local_version
    }

    /// Committed rows have a non-zero local version.
    pub fn is_committed(&self) -> bool {
        match self {
            Self::MoveUncommitted { .. } => false,
            _ => self.local_version() != 0,
        }
    }

    /// Whether the row goes out with the next update-local-version call.
    pub fn is_send_to_server(&self) -> bool {
        match self {
            Self::Populated { send_to_server, .. }
            | Self::InitiallyDeleted { send_to_server, .. } => *send_to_server,
            Self::MoveUncommitted { .. } => false,
        }
    }

    /// Exclude or include the row in the next update-local-version call.
    /// Uncommitted moves are never sent, so the flag is ignored for them.
    pub fn set_send_to_server(&mut self, value: bool) {
        match self {
            Self::Populated { send_to_server, .. }
            | Self::InitiallyDeleted { send_to_server, .. } => *send_to_server = value,
            Self::MoveUncommitted { .. } => {}
        }
    }

    /// True when the baseline hash and length are known and, if
    /// `require_date` is set, the local version date as well.
    pub fn is_fully_populated(&self, require_date: bool) -> bool {
        match self {
            Self::Populated { baseline, .. } | Self::InitiallyDeleted { baseline, .. } => {
                baseline.baseline_hash.is_some()
                    && baseline.baseline_length.is_some()
                    && (!require_date || baseline.local_version_date.is_some())
            }
            Self::MoveUncommitted { .. } => true,
        }
    }

    /// Assign a fresh baseline file id if the row has none yet. Returns the
    /// id now in effect.
    pub fn generate_baseline_file_id(&mut self) -> Option<Uuid> {
        match self {
            Self::Populated { baseline, .. } | Self::InitiallyDeleted { baseline, .. } => {
                Some(*baseline.baseline_file_id.get_or_insert_with(Uuid::new_v4))
            }
            Self::MoveUncommitted { .. } => None,
        }
    }

    /// Fill in baseline data from `source`.
    pub fn update_from(&mut self, source: UpdateSource<'_>) -> Result<(), VersionError> {
        let variant = self.kind();
        let unsupported = |source: &UpdateSource<'_>| VersionError::UnsupportedOperation {
            variant,
            source_kind: source.kind(),
        };

        match (self, source) {
            (Self::Populated { row, baseline, .. }, UpdateSource::Item(item)) => {
                debug!(server_item = %row.source_server_item, "populating from server item");
                fill_from_item(baseline, item);
                Ok(())
            }
            (Self::Populated { row, baseline, .. }, UpdateSource::LocalVersion(existing)) => {
                debug!(server_item = %row.source_server_item, "populating from local version");
                if let Some(other) = existing.baseline() {
                    fill_from_baseline(baseline, other);
                }
                Ok(())
            }
            (
                Self::Populated { baseline, .. } | Self::InitiallyDeleted { baseline, .. },
                UpdateSource::PendingChange(change),
            ) => {
                debug!(server_item = %change.server_item, "populating from pending change");
                fill_from_pending_change(baseline, change);
                Ok(())
            }
            (Self::InitiallyDeleted { .. } | Self::MoveUncommitted { .. }, source) => {
                Err(unsupported(&source))
            }
        }
    }
}

fn fill_from_item(baseline: &mut Baseline, item: &Item) {
    if baseline.baseline_hash.is_none() {
        baseline.baseline_hash = item.content_hash.clone();
    }
    if baseline.baseline_length.is_none() && item.content_hash.is_some() {
        baseline.baseline_length = Some(item.content_length);
    }
    if baseline.download_url.is_none() {
        baseline.download_url = item.download_url.clone();
    }
    if baseline.local_version_date.is_none() {
        baseline.local_version_date = item.checkin_date;
    }
    if baseline.encoding == 0 {
        baseline.encoding = item.encoding;
    }
}

fn fill_from_baseline(baseline: &mut Baseline, other: &Baseline) {
    if baseline.baseline_file_id.is_none() {
        baseline.baseline_file_id = other.baseline_file_id;
    }
    if baseline.baseline_hash.is_none() {
        baseline.baseline_hash = other.baseline_hash.clone();
    }
    if baseline.baseline_length.is_none() {
        baseline.baseline_length = other.baseline_length;
    }
    if baseline.local_version_date.is_none() {
        baseline.local_version_date = other.local_version_date;
    }
    if baseline.encoding == 0 {
        baseline.encoding = other.encoding;
    }
}

fn fill_from_pending_change(baseline: &mut Baseline, change: &PendingChange) {
    if change.length >= 0 {
        baseline.baseline_length = Some(change.length);
    }
    if change.upload_hash.is_some() {
        baseline.baseline_hash = change.upload_hash.clone();
    }
}
