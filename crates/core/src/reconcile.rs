//! Reconciliation of pending changes with a committed changeset.
//!
//! After a check-in the server returns the changeset it created. Pending
//! changes that the changeset already contains are complete: the caller
//! undoes them locally and moves the matching local versions to the new
//! changeset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ReconcileError;
use crate::models::{fold_path, paths_equal, ChangeType, Changeset, PendingChange};
use crate::version::{LocalVersionUpdates, VersionRecord};

/// Pending changes completed by a changeset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub matched_at_least_one_pending_change: bool,
    /// In the order the pending changes were supplied.
    pub reconcilable_pending_changes: Vec<PendingChange>,
}

/// Whether a committed change of type `committed` completes `pending`.
/// Locks are never committed, so a lock-only pending change never matches.
pub fn is_subsumed(pending: ChangeType, committed: ChangeType) -> bool {
    let wanted = pending.committable();
    !wanted.is_empty() && committed.contains(wanted)
}

/// Find the pending changes that `changeset` completes.
pub fn reconcile(changeset: &Changeset, pending_changes: &[PendingChange]) -> ReconciliationResult {
    let mut committed: HashMap<String, ChangeType> = HashMap::new();
    for change in &changeset.changes {
        *committed
            .entry(fold_path(&change.item.server_item))
            .or_insert_with(ChangeType::empty) |= change.change_type;
    }

    let reconcilable_pending_changes: Vec<PendingChange> = pending_changes
        .iter()
        .filter(|pending| {
            let matched = committed
                .get(&fold_path(&pending.server_item))
                .is_some_and(|&change_type| is_subsumed(pending.change_type, change_type));
            debug!(
                server_item = %pending.server_item,
                change_type = ?pending.change_type,
                matched,
                "checked pending change"
            );
            matched
        })
        .cloned()
        .collect();

    info!(
        changeset_id = changeset.changeset_id,
        pending = pending_changes.len(),
        reconcilable = reconcilable_pending_changes.len(),
        "reconciled pending changes"
    );

    ReconciliationResult {
        matched_at_least_one_pending_change: !reconcilable_pending_changes.is_empty(),
        reconcilable_pending_changes,
    }
}

impl ReconciliationResult {
    pub fn len(&self) -> usize {
        self.reconcilable_pending_changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reconcilable_pending_changes.is_empty()
    }

    /// Move the local versions behind the reconcilable changes to
    /// `changeset_id`.
    ///
    /// A record matches a pending change on either its current or, for
    /// renames, its source server item. Deletes drop the row, uncommitted
    /// moves become populated rows at their new server path, and everything
    /// else is re-versioned in place. Records with no matching change are
    /// left out of the batch.
    pub fn local_version_updates(
        &self,
        changeset_id: i32,
        records: &[VersionRecord],
    ) -> Result<LocalVersionUpdates, ReconcileError> {
        if changeset_id < 1 {
            return Err(ReconcileError::InvalidChangeset(changeset_id));
        }

        let mut updates = LocalVersionUpdates::new();
        for pending in &self.reconcilable_pending_changes {
            let matches = |record: &&VersionRecord| {
                paths_equal(record.source_server_item(), &pending.server_item)
                    || pending
                        .source_server_item
                        .as_deref()
                        .is_some_and(|source| paths_equal(record.source_server_item(), source))
            };
            let Some(record) = records.iter().find(matches) else {
                debug!(server_item = %pending.server_item, "no local version for pending change");
                continue;
            };
            let promoted = promote(record, pending, changeset_id);
            if !paths_equal(promoted.source_server_item(), record.source_server_item()) {
                updates.queue_removal(record.source_server_item());
            }
            updates.queue(promoted);
        }
        Ok(updates)
    }
}

fn promote(record: &VersionRecord, pending: &PendingChange, changeset_id: i32) -> VersionRecord {
    let mut promoted = match record {
        VersionRecord::MoveUncommitted {
            row,
            new_target_server_item,
            ..
        } => VersionRecord::populated(
            new_target_server_item.clone(),
            row.item_id,
            row.target_local_item.clone(),
            changeset_id,
        ),
        _ => record.clone(),
    };

    let row = promoted.row_mut();
    row.local_version = changeset_id;
    if pending.change_type.contains(ChangeType::RENAME) {
        row.source_server_item = pending.server_item.clone();
    }
    if pending.change_type.contains(ChangeType::DELETE) {
        row.target_local_item = None;
    }
    promoted.set_send_to_server(true);
    promoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Change, Item};

    fn changeset(changes: &[(&str, ChangeType)]) -> Changeset {
        Changeset {
            changeset_id: 12,
            owner: "dev".into(),
            comment: String::new(),
            date: None,
            changes: changes
                .iter()
                .enumerate()
                .map(|(i, (path, change_type))| Change {
                    item: Item::new(*path, i as i32 + 1, 12),
                    change_type: *change_type,
                })
                .collect(),
        }
    }

    #[test]
    fn test_matching_edit_is_reconcilable() {
        let cs = changeset(&[("$/p/a.txt", ChangeType::EDIT)]);
        let pending = vec![PendingChange::new("$/p/a.txt", ChangeType::EDIT)];
        let result = reconcile(&cs, &pending);
        assert!(result.matched_at_least_one_pending_change);
        assert_eq!(result.reconcilable_pending_changes, pending);
    }

    #[test]
    fn test_different_item_does_not_match() {
        let cs = changeset(&[("$/p/a.txt", ChangeType::EDIT)]);
        let pending = vec![PendingChange::new("$/p/b.txt", ChangeType::EDIT)];
        let result = reconcile(&cs, &pending);
        assert!(!result.matched_at_least_one_pending_change);
        assert!(result.is_empty());
    }

    #[test]
    fn test_path_match_ignores_case() {
        let cs = changeset(&[("$/Proj/A.txt", ChangeType::EDIT)]);
        let pending = vec![PendingChange::new("$/proj/a.TXT", ChangeType::EDIT)];
        assert!(reconcile(&cs, &pending).matched_at_least_one_pending_change);
    }

    #[test]
    fn test_change_type_must_be_covered() {
        let cs = changeset(&[("$/p/a.txt", ChangeType::EDIT)]);
        let pending = vec![PendingChange::new(
            "$/p/a.txt",
            ChangeType::EDIT | ChangeType::RENAME,
        )];
        assert!(!reconcile(&cs, &pending).matched_at_least_one_pending_change);

        let pending = vec![PendingChange::new(
            "$/p/a.txt",
            ChangeType::EDIT | ChangeType::LOCK,
        )];
        assert!(reconcile(&cs, &pending).matched_at_least_one_pending_change);
    }

    #[test]
    fn test_lock_only_never_matches() {
        let cs = changeset(&[("$/p/a.txt", ChangeType::EDIT | ChangeType::LOCK)]);
        let pending = vec![PendingChange::new("$/p/a.txt", ChangeType::LOCK)];
        assert!(!reconcile(&cs, &pending).matched_at_least_one_pending_change);
    }

    #[test]
    fn test_order_preserved_and_input_untouched() {
        let cs = changeset(&[
            ("$/p/c.txt", ChangeType::ADD | ChangeType::EDIT),
            ("$/p/a.txt", ChangeType::EDIT),
        ]);
        let pending = vec![
            PendingChange::new("$/p/a.txt", ChangeType::EDIT),
            PendingChange::new("$/p/b.txt", ChangeType::EDIT),
            PendingChange::new("$/p/c.txt", ChangeType::ADD | ChangeType::EDIT),
        ];
        let before = pending.clone();
        let result = reconcile(&cs, &pending);
        let paths: Vec<_> = result
            .reconcilable_pending_changes
            .iter()
            .map(|p| p.server_item.as_str())
            .collect();
        assert_eq!(paths, vec!["$/p/a.txt", "$/p/c.txt"]);
        assert_eq!(pending, before);
    }

    #[test]
    fn test_empty_changeset() {
        let cs = changeset(&[]);
        let pending = vec![PendingChange::new("$/p/a.txt", ChangeType::EDIT)];
        let result = reconcile(&cs, &pending);
        assert_eq!(result, ReconciliationResult::default());
    }

    #[test]
    fn test_local_version_updates() {
        let cs = changeset(&[
            ("$/p/a.txt", ChangeType::EDIT),
            ("$/p/gone.txt", ChangeType::DELETE),
            ("$/p/new.txt", ChangeType::ADD | ChangeType::RENAME),
        ]);
        let mut rename = PendingChange::new("$/p/new.txt", ChangeType::ADD | ChangeType::RENAME);
        rename.source_server_item = Some("$/p/old.txt".into());
        let pending = vec![
            PendingChange::new("$/p/a.txt", ChangeType::EDIT),
            PendingChange::new("$/p/gone.txt", ChangeType::DELETE),
            rename,
        ];
        let records = vec![
            VersionRecord::populated("$/p/A.txt", 1, Some("/w/a.txt".into()), 5),
            VersionRecord::populated("$/p/gone.txt", 2, Some("/w/gone.txt".into()), 5),
            VersionRecord::move_uncommitted(
                "$/p/old.txt",
                3,
                "$/p/new.txt",
                "/w/old.txt",
                Some("/w/new.txt".into()),
            ),
            VersionRecord::populated("$/p/other.txt", 4, Some("/w/other.txt".into()), 5),
        ];

        let updates = reconcile(&cs, &pending)
            .local_version_updates(12, &records)
            .unwrap();
        assert_eq!(updates.records().len(), 3);
        // The renamed row is also removed under its old key.
        assert_eq!(updates.len(), 4);

        let queued = updates.records();
        assert_eq!(queued[0].local_version(), 12);
        assert_eq!(queued[0].target_local_item(), Some("/w/a.txt"));
        assert_eq!(queued[1].target_local_item(), None);
        assert_eq!(queued[2].kind(), "populated");
        assert_eq!(queued[2].source_server_item(), "$/p/new.txt");
        assert!(queued[2].is_committed());
        assert_eq!(updates.server_updates().len(), 3);
    }

    #[test]
    fn test_local_version_updates_rejects_invalid_changeset() {
        let result = ReconciliationResult::default();
        let err = result.local_version_updates(0, &[]).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidChangeset(0)));
    }
}
