//! The local version store.
//!
//! One SQLite file per workspace holds the `local_versions` table, keyed by
//! the case-folded source server item. [`Database::open`] always leaves the
//! schema migrated, so every handle a caller sees is ready for the queries
//! in [`queries`].

pub mod queries;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Handle on a workspace's local version store.
///
/// `Send + Sync`: the connection sits behind a `Mutex`, and every query
/// holds the lock for its whole duration.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open the store at `path`, creating the file and its directory on
    /// first use, and migrate it to the current schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening local version store");

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Self::migrated(conn, Some(path.to_path_buf()))
    }

    /// A migrated store that lives only as long as the handle.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(Connection::open_in_memory()?, None)
    }

    fn migrated(conn: Connection, path: Option<PathBuf>) -> Result<Self, DatabaseError> {
        schema::run_migrations(&conn)?;
        let version = schema::schema_version(&conn)?;
        debug!(version, in_memory = path.is_none(), "local version store ready");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// File backing the store; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        schema::schema_version(&self.conn())
    }

    /// Lock the connection. A panic in another holder does not leave the
    /// store unusable: the poisoned guard is taken over.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("local version store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one transaction; any error rolls back everything it wrote.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
