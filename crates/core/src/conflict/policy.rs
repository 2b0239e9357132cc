//! Auto-resolve policy.
//!
//! Decides, from a conflict and its change summary, whether the conflict may
//! be resolved without asking the user, which resolution to apply, and
//! whether the resolution should be reported. Evaluation is a pure function
//! of the options and its inputs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conflict::merger::MergeSummary;
use crate::models::{bits_serde, paths_equal, ChangeType, Conflict, ConflictType, Resolution};

bitflags::bitflags! {
    /// Which conflicts may be resolved automatically. Values match the
    /// server's encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AutoResolveOptions: u32 {
        /// Only the local (target) side changed.
        const ONLY_LOCAL_TARGET = 1;
        /// Only the server (source) side changed.
        const ONLY_SERVER_SOURCE = 2;
        /// Both sides changed, without overlapping edits.
        const BOTH = 4;
        /// The server renamed the item and the workspace did not.
        const INCOMING_NAME = 8;
        /// Both sides made the same change.
        const REDUNDANT = 16;
        /// Do not report resolutions that needed a name or encoding.
        const SILENT = 32;

        const ALL = Self::ONLY_LOCAL_TARGET.bits()
            | Self::ONLY_SERVER_SOURCE.bits()
            | Self::BOTH.bits()
            | Self::INCOMING_NAME.bits()
            | Self::REDUNDANT.bits();
        const ALL_SILENT = Self::ALL.bits() | Self::SILENT.bits();
    }
}

bits_serde!(AutoResolveOptions);

impl Default for AutoResolveOptions {
    fn default() -> Self {
        Self::ALL
    }
}

impl AutoResolveOptions {
    /// Parse a configuration rule name.
    pub fn from_rule_name(name: &str) -> Option<Self> {
        match name {
            "only_local_target" => Some(Self::ONLY_LOCAL_TARGET),
            "only_server_source" => Some(Self::ONLY_SERVER_SOURCE),
            "both" => Some(Self::BOTH),
            "incoming_name" => Some(Self::INCOMING_NAME),
            "redundant" => Some(Self::REDUNDANT),
            "silent" => Some(Self::SILENT),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Change summary
// ---------------------------------------------------------------------------

/// Per-conflict counters supplied by the server or derived from a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Lines changed differently on both sides.
    pub total_conflicting: usize,
    /// Lines changed only on the server.
    pub total_latest: usize,
    /// Lines changed only locally.
    pub total_modified: usize,
    /// Overlapping conflict regions.
    pub total_conflict: usize,
}

impl ChangeSummary {
    /// Nothing changed on the server side.
    pub fn only_local_target_changed(&self) -> bool {
        self.total_conflicting == 0 && self.total_latest == 0
    }

    /// Nothing changed locally.
    pub fn only_server_source_changed(&self) -> bool {
        self.total_conflicting == 0 && self.total_modified == 0
    }

    /// The two sides' changes do not overlap.
    pub fn both_changed_without_conflict(&self) -> bool {
        self.total_conflict == 0
    }
}

impl From<&MergeSummary> for ChangeSummary {
    fn from(summary: &MergeSummary) -> Self {
        Self {
            total_conflicting: summary.conflicting_lines,
            total_latest: summary.latest_changed_lines,
            total_modified: summary.local_changed_lines,
            total_conflict: summary.conflict_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Redundant change tie-break
// ---------------------------------------------------------------------------

/// How a change that is both a rename and an edit is judged redundant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameEditPrecedence {
    /// The edit wins: content must match as well as the path.
    #[default]
    RequireContentMatch,
    /// The rename wins: a matching path is enough.
    PathOnly,
    /// A combined rename and edit is never redundant.
    NeverRedundant,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of an eligible conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResolveDecision {
    /// The single rule that made the conflict eligible.
    pub rule: AutoResolveOptions,
    pub resolution: Resolution,
    /// Server path to take from the incoming rename, if any.
    pub new_path: Option<String>,
    /// Whether the resolution should be surfaced to the user.
    pub report: bool,
}

impl AutoResolveDecision {
    /// Whether applying this decision needs merged content.
    pub fn needs_merge(&self) -> bool {
        self.resolution == Resolution::AcceptMerge
    }
}

/// Evaluates [`AutoResolveOptions`] against conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoResolvePolicy {
    pub options: AutoResolveOptions,
    pub rename_edit: RenameEditPrecedence,
}

impl AutoResolvePolicy {
    pub fn new(options: AutoResolveOptions) -> Self {
        Self {
            options,
            rename_edit: RenameEditPrecedence::default(),
        }
    }

    pub fn with_rename_edit(mut self, rename_edit: RenameEditPrecedence) -> Self {
        self.rename_edit = rename_edit;
        self
    }

    /// The first content rule enabled and satisfied by `summary`, checked in
    /// the order only-local-target, only-server-source, both.
    pub fn content_rule(&self, summary: &ChangeSummary) -> Option<AutoResolveOptions> {
        if self.options.contains(AutoResolveOptions::ONLY_LOCAL_TARGET)
            && summary.only_local_target_changed()
        {
            Some(AutoResolveOptions::ONLY_LOCAL_TARGET)
        } else if self.options.contains(AutoResolveOptions::ONLY_SERVER_SOURCE)
            && summary.only_server_source_changed()
        {
            Some(AutoResolveOptions::ONLY_SERVER_SOURCE)
        } else if self.options.contains(AutoResolveOptions::BOTH)
            && summary.both_changed_without_conflict()
        {
            Some(AutoResolveOptions::BOTH)
        } else {
            None
        }
    }

    /// Whether both sides made the same change. Only get and check-in
    /// conflicts qualify.
    pub fn is_redundant(&self, conflict: &Conflict) -> bool {
        if !matches!(
            conflict.conflict_type,
            ConflictType::Get | ConflictType::Checkin
        ) {
            return false;
        }
        let yours = conflict.your_change_type.committable();
        let theirs = conflict.their_change_type.committable();
        if yours != theirs
            || conflict.your_encoding != conflict.their_encoding
            || !paths_equal(&conflict.your_server_item, &conflict.their_server_item)
        {
            return false;
        }

        let edits = yours.intersects(ChangeType::CONTENT);
        let renames = yours.contains(ChangeType::RENAME);
        let content_must_match = match (edits, renames, self.rename_edit) {
            (false, _, _) => false,
            (true, false, _) => true,
            (true, true, RenameEditPrecedence::RequireContentMatch) => true,
            (true, true, RenameEditPrecedence::PathOnly) => false,
            (true, true, RenameEditPrecedence::NeverRedundant) => return false,
        };

        !content_must_match
            || matches!(
                (&conflict.your_hash, &conflict.their_hash),
                (Some(y), Some(t)) if !y.is_empty() && y == t
            )
    }

    /// Decide whether `conflict` can be resolved automatically.
    ///
    /// `summary` describes the content changes; it is `None` when neither
    /// side changed content or the counters are not available yet.
    pub fn evaluate(
        &self,
        conflict: &Conflict,
        summary: Option<&ChangeSummary>,
    ) -> Option<AutoResolveDecision> {
        let silent = self.options.contains(AutoResolveOptions::SILENT);

        if self.options.contains(AutoResolveOptions::REDUNDANT) && self.is_redundant(conflict) {
            debug!(conflict_id = conflict.conflict_id, "redundant change");
            return Some(AutoResolveDecision {
                rule: AutoResolveOptions::REDUNDANT,
                resolution: Resolution::AcceptYours,
                new_path: None,
                report: false,
            });
        }

        let their_rename = conflict.their_change_type.contains(ChangeType::RENAME)
            && !paths_equal(&conflict.your_server_item, &conflict.their_server_item);
        let new_path = if their_rename {
            if conflict.your_change_type.contains(ChangeType::RENAME)
                || !self.options.contains(AutoResolveOptions::INCOMING_NAME)
            {
                return None;
            }
            Some(conflict.their_server_item.clone())
        } else {
            None
        };
        let report = new_path.is_some() && !silent;

        let content_changed = conflict.your_change_type.intersects(ChangeType::CONTENT)
            || conflict.their_change_type.intersects(ChangeType::CONTENT);

        if !content_changed {
            return new_path.map(|path| AutoResolveDecision {
                rule: AutoResolveOptions::INCOMING_NAME,
                resolution: Resolution::AcceptYoursRenameTheirs,
                new_path: Some(path),
                report,
            });
        }

        let rule = self.content_rule(summary?)?;
        let resolution = if rule == AutoResolveOptions::ONLY_LOCAL_TARGET {
            if new_path.is_some() {
                Resolution::AcceptYoursRenameTheirs
            } else {
                Resolution::AcceptYours
            }
        } else if rule == AutoResolveOptions::ONLY_SERVER_SOURCE {
            Resolution::AcceptTheirs
        } else {
            if conflict.your_encoding != conflict.their_encoding {
                debug!(
                    conflict_id = conflict.conflict_id,
                    "encodings differ, not merging"
                );
                return None;
            }
            Resolution::AcceptMerge
        };

        debug!(
            conflict_id = conflict.conflict_id,
            rule = ?rule,
            resolution = %resolution,
            "conflict eligible for auto-resolve"
        );
        Some(AutoResolveDecision {
            rule,
            resolution,
            new_path,
            report,
        })
    }
}
