//! Error types for the lws core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Local version errors
// ---------------------------------------------------------------------------

/// Errors from populating or persisting local version records.
#[derive(Debug, Error)]
pub enum VersionError {
    /// The record variant does not accept this population source. This is a
    /// caller bug, never a condition to recover from silently.
    #[error("{variant} records cannot be updated from {source_kind}")]
    UnsupportedOperation {
        variant: &'static str,
        source_kind: &'static str,
    },

    /// A persisted row carried a `kind` column this build does not know.
    #[error("unknown local version kind '{0}'")]
    UnknownKind(String),

    /// A persisted baseline id was not a valid 16-byte identifier.
    #[error("invalid baseline file id for '{server_item}': {detail}")]
    InvalidBaselineId {
        server_item: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Precondition failures of the three-way merge engine.
#[derive(Debug, Error)]
pub enum MergeError {
    /// One of the inputs is not line-oriented text.
    #[error("cannot merge binary content: the {side} input contains NUL bytes")]
    BinaryInput { side: &'static str },
}

// ---------------------------------------------------------------------------
// Conflict resolution errors
// ---------------------------------------------------------------------------

/// Per-conflict failures. These are isolated to the conflict that raised
/// them and surfaced as non-fatal events.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Attempted to resolve a conflict that already reached a terminal state.
    #[error("conflict {0} is already resolved")]
    AlreadyResolved(i32),

    /// Attempted to resolve a conflict that previously failed.
    #[error("conflict {0} previously failed and cannot be resolved in this pass")]
    AlreadyErrored(i32),

    /// The content needed to merge the conflict could not be obtained.
    #[error("content for conflict {id} is unavailable: {source}")]
    ContentUnavailable {
        id: i32,
        #[source]
        source: anyhow::Error,
    },

    /// The three-way merge could not run on the supplied content.
    #[error("merge failed for conflict {id}: {source}")]
    MergeFailed {
        id: i32,
        #[source]
        source: MergeError,
    },

    /// The merge produced conflicting hunks although the policy allowed it.
    #[error("conflict {id} still has {conflicting_lines} conflicting line(s) after merge")]
    UnmergedContent { id: i32, conflicting_lines: usize },
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

/// Errors from reconciling pending changes with a committed changeset.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Changeset ids start at 1.
    #[error("invalid changeset id {0}")]
    InvalidChangeset(i32),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored row could not be turned back into a record.
    #[error("corrupt row: {0}")]
    CorruptRow(#[from] VersionError),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = VersionError::UnsupportedOperation {
            variant: "initially-deleted",
            source_kind: "a server item",
        };
        assert_eq!(
            err.to_string(),
            "initially-deleted records cannot be updated from a server item"
        );

        let err = MergeError::BinaryInput { side: "latest" };
        assert!(err.to_string().contains("latest"));

        let err = ResolutionError::AlreadyResolved(7);
        assert_eq!(err.to_string(), "conflict 7 is already resolved");

        let err = ConfigError::InvalidValue {
            field: "auto_resolve.options".into(),
            detail: "unknown rule 'bogus'".into(),
        };
        assert!(err.to_string().contains("auto_resolve.options"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err: CoreError = MergeError::BinaryInput { side: "local" }.into();
        assert!(matches!(err, CoreError::Merge(_)));

        let err: CoreError = ReconcileError::InvalidChangeset(0).into();
        assert!(matches!(err, CoreError::Reconcile(_)));
    }
}
