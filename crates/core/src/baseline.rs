//! Session cache of already-uploaded baselines.
//!
//! Check-in uploads file content before the server accepts the changes. When
//! the same local path is uploaded again in the same session (a preview
//! followed by the real check-in, or several pending changes touching the
//! same file) the cached baseline id is reused instead of hashing and
//! uploading again.
//!
//! Keys are local paths compared case-insensitively. Every call takes the
//! lock once and releases it before returning; no lock is held across an
//! upload.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::models::fold_path;

/// Identity of an uploaded baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub baseline_file_id: Uuid,
    pub uncompressed_length: u64,
}

/// Concurrent `local path → uploaded baseline` map, owned by one workspace
/// session.
#[derive(Debug, Default)]
pub struct BaselineCache {
    entries: Mutex<BTreeMap<String, BaselineEntry>>,
}

impl BaselineCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BaselineEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("baseline cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Record an uploaded baseline for `path`, replacing any earlier entry.
    pub fn put(&self, path: &str, baseline_file_id: Uuid, uncompressed_length: u64) {
        let entry = BaselineEntry {
            baseline_file_id,
            uncompressed_length,
        };
        self.lock().insert(fold_path(path), entry);
        debug!(path, %baseline_file_id, uncompressed_length, "cached uploaded baseline");
    }

    pub fn get(&self, path: &str) -> Option<BaselineEntry> {
        self.lock().get(&fold_path(path)).copied()
    }

    /// Forget `path`. Returns the entry that was removed, if any.
    pub fn remove(&self, path: &str) -> Option<BaselineEntry> {
        let removed = self.lock().remove(&fold_path(path));
        if removed.is_some() {
            debug!(path, "dropped cached baseline");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Return the cached baseline for `path`, or run `upload` and cache its
    /// result. The flag is true when `upload` ran.
    ///
    /// A cached entry whose length differs from `length` is stale and
    /// triggers a new upload. `upload` runs without the lock held, so two
    /// workers racing on the same path may both upload; the later `put` wins.
    pub fn ensure_uploaded<E, F>(
        &self,
        path: &str,
        length: u64,
        upload: F,
    ) -> Result<(BaselineEntry, bool), E>
    where
        F: FnOnce() -> Result<Uuid, E>,
    {
        if let Some(entry) = self.get(path) {
            if entry.uncompressed_length == length {
                debug!(path, "reusing uploaded baseline");
                return Ok((entry, false));
            }
        }

        let baseline_file_id = upload()?;
        self.put(path, baseline_file_id, length);
        Ok((
            BaselineEntry {
                baseline_file_id,
                uncompressed_length: length,
            },
            true,
        ))
    }
}
