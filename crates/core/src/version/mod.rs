//! Local version tracking.
//!
//! [`VersionRecord`] models one row of the workspace's local version table;
//! [`LocalVersionUpdates`] collects the rows changed by a pass and writes
//! them to the [`Database`](crate::db::Database) together.

pub mod batch;
pub mod record;

pub use batch::{FlushStats, LocalVersionUpdates, ServerLocalVersionUpdate};
pub use record::{Baseline, UpdateSource, VersionRecord, VersionRow};
