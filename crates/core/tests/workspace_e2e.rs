//! End-to-end tests for a local workspace session.
//!
//! These tests exercise a real `LocalWorkspace` with:
//! - A TOML config file and an on-disk SQLite store in a temp directory
//! - Conflicting files on disk, read through a `ConflictContentSource`
//! - A check-in reconciled against the persisted local versions
//!
//! No network I/O: the server side is simulated with in-memory values.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use lws_core::conflict::{RecordingEventSink, ResolutionEvent};
use lws_core::models::{
    Change, ChangeType, Changeset, Conflict, ConflictState, ConflictType, Item, PendingChange,
    Resolution, VersionSpec,
};
use lws_core::version::{LocalVersionUpdates, UpdateSource};
use lws_core::workspace::{ConflictContent, ConflictContentSource};
use lws_core::{AppConfig, Database, LocalWorkspace, VersionRecord};

// ===========================================================================
// Helpers
// ===========================================================================

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let config_path = root.join("lws.toml");
        let config = format!(
            r#"
[workspace]
name = "e2e"
data_dir = "{}"
log_level = "debug"

[merge]
local_label = "workspace"
latest_label = "server"
"#,
            root.join("state").display()
        );
        std::fs::write(&config_path, config).unwrap();
        Self {
            _tmp: tmp,
            root,
            config_path,
        }
    }

    fn open(&self) -> LocalWorkspace {
        let config = AppConfig::load_from_file(&self.config_path).unwrap();
        LocalWorkspace::open(config).unwrap()
    }

    /// Write the base, local and latest copies of `name`; the local copy is
    /// the working file.
    fn conflict_files(&self, name: &str, base: &str, local: &str, latest: &str) -> PathBuf {
        let dir = self.root.join("versions").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("base"), base).unwrap();
        std::fs::write(dir.join("latest"), latest).unwrap();
        let working = self.root.join("work").join(name);
        std::fs::create_dir_all(working.parent().unwrap()).unwrap();
        std::fs::write(&working, local).unwrap();
        working
    }
}

/// Reads conflict content from the files laid out by `conflict_files`.
struct DiskContent {
    root: PathBuf,
}

impl ConflictContentSource for DiskContent {
    fn content(&self, conflict: &Conflict) -> anyhow::Result<ConflictContent> {
        let working = PathBuf::from(
            conflict
                .target_local_item
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("conflict has no local item"))?,
        );
        let name = working
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("bad local item"))?;
        let dir = self.root.join("versions").join(name);
        Ok(ConflictContent {
            base: std::fs::read_to_string(dir.join("base"))?,
            local: std::fs::read_to_string(&working)?,
            latest: std::fs::read_to_string(dir.join("latest"))?,
        })
    }
}

fn edit_conflict(id: i32, server_item: &str, local: &Path, their_version: i32) -> Conflict {
    let mut c = Conflict::new(id, ConflictType::Get, server_item);
    c.your_change_type = ChangeType::EDIT;
    c.their_change_type = ChangeType::EDIT;
    c.their_version = their_version;
    c.target_local_item = Some(local.display().to_string());
    c
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_auto_resolve_merges_and_queues_gets() {
    let env = TestEnv::new();
    let ws = env.open();

    let merged_path = env.conflict_files(
        "notes.txt",
        "alpha\nbeta\ngamma\ndelta\n",
        "ALPHA\nbeta\ngamma\ndelta\n",
        "alpha\nbeta\ngamma\nDELTA\n",
    );
    let clash_path = env.conflict_files("clash.txt", "one\n", "mine\n", "theirs\n");
    let local_only_path = env.conflict_files("local.txt", "x\ny\n", "x\nY\n", "x\ny\n");

    let merged_key = merged_path.display().to_string();
    let (_, uploaded) = ws
        .baselines()
        .ensure_uploaded::<(), _>(&merged_key, 24, || Ok(Uuid::new_v4()))
        .unwrap();
    assert!(uploaded);

    let mut conflicts = vec![
        edit_conflict(1, "$/proj/notes.txt", &merged_path, 31),
        edit_conflict(2, "$/proj/clash.txt", &clash_path, 32),
        edit_conflict(3, "$/proj/local.txt", &local_only_path, 0),
    ];
    let content = DiskContent {
        root: env.root.clone(),
    };
    let sink = RecordingEventSink::new();

    let report = ws.auto_resolve(&mut conflicts, &content, &sink);
    assert_eq!(report.resolved, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errored, 0);

    assert_eq!(conflicts[0].resolution, Resolution::AcceptMerge);
    assert_eq!(conflicts[1].state, ConflictState::Unresolved);
    assert_eq!(conflicts[2].resolution, Resolution::AcceptYours);

    // The caller applies the merge; the stale baseline is gone.
    let merged = &report.merged[0];
    assert_eq!(merged.outcome.content, "ALPHA\nbeta\ngamma\nDELTA\n");
    std::fs::write(merged.local_item.as_deref().unwrap(), &merged.outcome.content).unwrap();
    assert!(ws.baselines().get(&merged_key).is_none());

    let versions: Vec<_> = report.get_requests.iter().map(|r| r.version).collect();
    assert_eq!(
        versions,
        vec![VersionSpec::Changeset(31), VersionSpec::Changeset(1)]
    );
    assert_eq!(sink.len(), 2);
    assert!(sink
        .events()
        .iter()
        .all(|e| matches!(e, ResolutionEvent::ConflictResolved { .. })));
}

#[test]
fn test_unreadable_content_is_reported_not_fatal() {
    let env = TestEnv::new();
    let ws = env.open();
    let ok_path = env.conflict_files("ok.txt", "a\nb\n", "a\nb\n", "a\nB\n");
    let missing = env.root.join("work").join("missing.txt");

    let mut conflicts = vec![
        edit_conflict(10, "$/proj/missing.txt", &missing, 5),
        edit_conflict(11, "$/proj/ok.txt", &ok_path, 6),
    ];
    let content = DiskContent {
        root: env.root.clone(),
    };
    let sink = RecordingEventSink::new();

    let report = ws.auto_resolve(&mut conflicts, &content, &sink);
    assert_eq!(report.errored, 1);
    assert_eq!(report.resolved, 1);
    assert_eq!(conflicts[0].state, ConflictState::Errored);
    assert_eq!(conflicts[1].resolution, Resolution::AcceptTheirs);
    assert_eq!(report.get_requests.len(), 1);
    assert_eq!(report.get_requests[0].item, ok_path.display().to_string());
}

#[test]
fn test_checkin_reconciliation_persists_across_sessions() {
    let env = TestEnv::new();

    {
        let ws = env.open();
        let mut edited = VersionRecord::populated("$/proj/a.txt", 1, Some("/w/a.txt".into()), 4);
        let mut item = Item::new("$/proj/a.txt", 1, 4);
        item.content_hash = Some(vec![0xab, 0xcd]);
        item.content_length = 12;
        edited.update_from(UpdateSource::Item(&item)).unwrap();
        edited.generate_baseline_file_id();

        let mut updates = LocalVersionUpdates::new();
        updates.queue(edited);
        updates.queue(VersionRecord::populated(
            "$/proj/gone.txt",
            2,
            Some("/w/gone.txt".into()),
            4,
        ));
        updates.queue(VersionRecord::populated(
            "$/proj/untouched.txt",
            3,
            Some("/w/untouched.txt".into()),
            4,
        ));
        let stats = updates.flush(ws.database()).unwrap();
        assert_eq!(stats.upserted, 3);
    }

    let changeset = Changeset {
        changeset_id: 5,
        owner: "dev".into(),
        comment: "check-in".into(),
        date: None,
        changes: vec![
            Change {
                item: Item::new("$/PROJ/A.txt", 1, 5),
                change_type: ChangeType::EDIT,
            },
            Change {
                item: Item::new("$/proj/gone.txt", 2, 5),
                change_type: ChangeType::DELETE,
            },
        ],
    };
    let pending = vec![
        PendingChange::new("$/proj/a.txt", ChangeType::EDIT | ChangeType::LOCK),
        PendingChange::new("$/proj/gone.txt", ChangeType::DELETE),
        PendingChange::new("$/proj/untouched.txt", ChangeType::LOCK),
    ];

    {
        let ws = env.open();
        let outcome = ws.reconcile_checkin(&changeset, &pending).unwrap();
        assert_eq!(outcome.result.len(), 2);
        assert_eq!(outcome.upserted, 1);
        assert_eq!(outcome.deleted, 1);
    }

    let db = Database::open(env.root.join("state").join("lws.db")).unwrap();
    assert_eq!(db.count_local_versions().unwrap(), 2);

    let a = db.get_local_version("$/proj/a.txt").unwrap().unwrap();
    assert_eq!(a.local_version(), 5);
    assert!(a.is_fully_populated(false));
    assert!(a.baseline().unwrap().baseline_file_id.is_some());

    let untouched = db.get_local_version("$/proj/untouched.txt").unwrap().unwrap();
    assert_eq!(untouched.local_version(), 4);
    assert!(db.get_local_version("$/proj/gone.txt").unwrap().is_none());
}

#[test]
fn test_initially_deleted_population() {
    let mut record = VersionRecord::initially_deleted("$/proj/old.txt", 9, 3);
    let item = Item::new("$/proj/old.txt", 9, 3);
    assert!(record.update_from(UpdateSource::Item(&item)).is_err());

    let other = VersionRecord::populated("$/proj/old.txt", 9, Some("/w/old.txt".into()), 3);
    assert!(record.update_from(UpdateSource::LocalVersion(&other)).is_err());

    let mut change = PendingChange::new("$/proj/old.txt", ChangeType::DELETE);
    change.length = 100;
    change.upload_hash = Some(vec![1, 2, 3]);
    record.update_from(UpdateSource::PendingChange(&change)).unwrap();
    assert!(record.is_fully_populated(false));
    assert!(record.baseline().unwrap().baseline_file_id.is_none());
}
