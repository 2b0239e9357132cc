//! A local workspace session.
//!
//! [`LocalWorkspace`] ties the engine together for one session: it owns the
//! configuration, the auto-resolve policy, the merge engine, the baseline
//! cache and the local version store. There is no process-wide state; two
//! sessions never share a cache.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::baseline::BaselineCache;
use crate::config::AppConfig;
use crate::conflict::{
    AutoResolvePolicy, ChangeSummary, ConflictResolutionHandler, EventSink, MergeOutcome,
    ThreeWayMerge,
};
use crate::db::Database;
use crate::errors::{CoreError, ResolutionError};
use crate::models::{ChangeType, Changeset, Conflict, ConflictState, GetRequest, PendingChange};
use crate::reconcile::{reconcile, ReconciliationResult};
use crate::version::{FlushStats, VersionRecord};

/// The three versions of a conflicting file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictContent {
    pub base: String,
    pub local: String,
    pub latest: String,
}

/// Supplies what the engine needs to know about a conflict's content.
pub trait ConflictContentSource {
    /// Change counters computed by the server, when it sent them.
    fn summary(&self, _conflict: &Conflict) -> Option<ChangeSummary> {
        None
    }

    /// Base, local and latest text of the conflicting file.
    fn content(&self, conflict: &Conflict) -> anyhow::Result<ConflictContent>;
}

/// A conflict resolved by merging; the caller writes `outcome.content` to
/// `local_item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedConflict {
    pub conflict_id: i32,
    pub local_item: Option<String>,
    pub outcome: MergeOutcome,
}

/// What one auto-resolve pass did.
#[derive(Debug, Default)]
pub struct AutoResolveReport {
    pub resolved: usize,
    pub skipped: usize,
    pub errored: usize,
    pub merged: Vec<MergedConflict>,
    /// Follow-up gets, to be issued as one batch.
    pub get_requests: Vec<GetRequest>,
}

/// Summary of reconciling a check-in with the local version store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinReconciliation {
    pub result: ReconciliationResult,
    pub upserted: usize,
    pub deleted: usize,
}

enum Attempt {
    NotEligible,
    Resolved(Option<MergedConflict>),
}

pub struct LocalWorkspace {
    config: AppConfig,
    policy: AutoResolvePolicy,
    merger: ThreeWayMerge,
    baselines: BaselineCache,
    db: Database,
}

impl LocalWorkspace {
    /// Open the workspace described by `config`, creating its local version
    /// store if needed.
    pub fn open(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Database::open(config.database_path())?;
        Self::with_database(config, db)
    }

    /// A workspace backed by an in-memory store.
    pub fn in_memory(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Self::with_database(config, Database::in_memory()?)
    }

    fn with_database(config: AppConfig, db: Database) -> Result<Self, CoreError> {
        let policy = config.policy()?;
        let merger = ThreeWayMerge::new(config.merge_options());
        info!(
            workspace = %config.workspace.name,
            options = policy.options.bits(),
            "workspace session opened"
        );
        Ok(Self {
            config,
            policy,
            merger,
            baselines: BaselineCache::new(),
            db,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn policy(&self) -> &AutoResolvePolicy {
        &self.policy
    }

    pub fn merger(&self) -> &ThreeWayMerge {
        &self.merger
    }

    pub fn baselines(&self) -> &BaselineCache {
        &self.baselines
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Try to resolve every unresolved conflict without the user.
    ///
    /// Conflicts the policy rejects are left unresolved. A failure on one
    /// conflict is reported to `sink` and does not stop the pass.
    pub fn auto_resolve(
        &self,
        conflicts: &mut [Conflict],
        content: &dyn ConflictContentSource,
        sink: &dyn EventSink,
    ) -> AutoResolveReport {
        let handler = ConflictResolutionHandler::new(sink);
        let mut report = AutoResolveReport::default();

        for conflict in conflicts.iter_mut() {
            if conflict.state != ConflictState::Unresolved {
                continue;
            }
            match self.resolve_one(conflict, content, &handler) {
                Ok(Attempt::Resolved(merged)) => {
                    report.resolved += 1;
                    report.merged.extend(merged);
                }
                Ok(Attempt::NotEligible) => report.skipped += 1,
                Err(e) => {
                    handler.on_error(conflict, &e);
                    report.errored += 1;
                }
            }
        }

        report.get_requests = handler.take_get_requests();
        info!(
            resolved = report.resolved,
            skipped = report.skipped,
            errored = report.errored,
            merged = report.merged.len(),
            "auto-resolve pass complete"
        );
        report
    }

    fn resolve_one(
        &self,
        conflict: &mut Conflict,
        content: &dyn ConflictContentSource,
        handler: &ConflictResolutionHandler<'_>,
    ) -> Result<Attempt, ResolutionError> {
        let content_changed = conflict.your_change_type.intersects(ChangeType::CONTENT)
            || conflict.their_change_type.intersects(ChangeType::CONTENT);

        let server_summary = content.summary(conflict);
        let mut outcome = None;
        let mut decision = self.policy.evaluate(conflict, server_summary.as_ref());

        // Without server counters, derive them from a local merge.
        if decision.is_none() && content_changed && server_summary.is_none() {
            let merged = self.merge_conflict(conflict, content)?;
            let summary = ChangeSummary::from(&merged.summary);
            decision = self.policy.evaluate(conflict, Some(&summary));
            outcome = Some(merged);
        }

        let Some(decision) = decision else {
            debug!(conflict_id = conflict.conflict_id, "conflict not eligible for auto-resolve");
            return Ok(Attempt::NotEligible);
        };

        let merged = if decision.needs_merge() {
            let outcome = match outcome {
                Some(outcome) => outcome,
                None => self.merge_conflict(conflict, content)?,
            };
            if outcome.has_conflicts() {
                return Err(ResolutionError::UnmergedContent {
                    id: conflict.conflict_id,
                    conflicting_lines: outcome.summary.conflicting_lines,
                });
            }
            let local_item = conflict.target_local_item.clone();
            if let Some(path) = &local_item {
                self.baselines.remove(path);
            }
            Some(MergedConflict {
                conflict_id: conflict.conflict_id,
                local_item,
                outcome,
            })
        } else {
            None
        };

        handler.on_resolved(conflict, decision.resolution, decision.report)?;
        Ok(Attempt::Resolved(merged))
    }

    fn merge_conflict(
        &self,
        conflict: &Conflict,
        content: &dyn ConflictContentSource,
    ) -> Result<MergeOutcome, ResolutionError> {
        let id = conflict.conflict_id;
        let text = content
            .content(conflict)
            .map_err(|source| ResolutionError::ContentUnavailable { id, source })?;
        self.merger
            .merge_text(&text.base, &text.local, &text.latest)
            .map_err(|source| ResolutionError::MergeFailed { id, source })
    }

    /// Reconcile a committed changeset with the workspace's pending changes
    /// and write the resulting local versions to the store.
    pub fn reconcile_checkin(
        &self,
        changeset: &Changeset,
        pending_changes: &[PendingChange],
    ) -> Result<CheckinReconciliation, CoreError> {
        let result = reconcile(changeset, pending_changes);
        if !result.matched_at_least_one_pending_change {
            return Ok(CheckinReconciliation {
                result,
                upserted: 0,
                deleted: 0,
            });
        }

        let records = self.db.list_local_versions()?;
        let updates = result.local_version_updates(changeset.changeset_id, &records)?;
        let FlushStats { upserted, deleted } = updates.flush(&self.db)?;
        Ok(CheckinReconciliation {
            result,
            upserted,
            deleted,
        })
    }

    pub fn local_versions(&self) -> Result<Vec<VersionRecord>, CoreError> {
        Ok(self.db.list_local_versions()?)
    }
}
