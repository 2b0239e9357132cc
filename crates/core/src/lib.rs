//! lws core library.
//!
//! This crate provides the local-workspace engine of a version-control
//! client: local version records and their store, the session cache of
//! uploaded baselines, conflict auto-resolution with a three-way merge, and
//! reconciliation of pending changes after a check-in.

pub mod baseline;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod models;
pub mod reconcile;
pub mod version;
pub mod workspace;

// Re-exports for convenience.
pub use baseline::BaselineCache;
pub use config::AppConfig;
pub use db::Database;
pub use reconcile::{reconcile, ReconciliationResult};
pub use version::{LocalVersionUpdates, VersionRecord};
pub use workspace::{ConflictContentSource, LocalWorkspace};
