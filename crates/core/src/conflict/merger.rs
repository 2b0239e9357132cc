//! Three-way merge engine.
//!
//! Aligns the local and latest copies against their common ancestor and
//! turns each alignment into edits over ancestor ranges. Edits of the two
//! sides that overlap form one region; every ancestor line is then unchanged,
//! changed on one side, changed identically on both, or changed differently
//! on both. The classification yields a [`MergeSummary`] and the merged
//! content, with conflict markers around every conflicting region.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::diff::align;
use crate::errors::MergeError;

/// Line counters of one three-way merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Ancestor lines neither side touched.
    pub common_lines: usize,
    /// Lines changed only in the local copy.
    pub local_changed_lines: usize,
    /// Lines changed only in the latest copy.
    pub latest_changed_lines: usize,
    /// Lines changed the same way on both sides.
    pub common_changed_lines: usize,
    /// Lines changed differently on both sides.
    pub conflicting_lines: usize,
    /// Number of conflicting stretches.
    pub conflict_count: usize,
}

impl MergeSummary {
    pub fn has_conflicts(&self) -> bool {
        self.conflicting_lines > 0
    }
}

/// A single conflict region within merged output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    /// Line number (1-indexed) of the `<<<<<<<` line.
    pub start_line: usize,
    /// Line number (1-indexed) of the `>>>>>>>` line.
    pub end_line: usize,
}

/// The result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merged content; contains conflict markers when the summary reports
    /// conflicting lines.
    pub content: String,
    pub summary: MergeSummary,
    pub conflict_markers: Vec<ConflictMarker>,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        self.summary.has_conflicts()
    }

    /// Unified diff of what the merge changes in `local`.
    pub fn unified_patch(&self, local: &str) -> String {
        diffy::create_patch(local, &self.content).to_string()
    }
}

/// Labels and layout of conflict markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub local_label: String,
    pub latest_label: String,
    /// Emit the ancestor lines between `|||||||` and `=======`.
    pub include_base: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            local_label: "yours".into(),
            latest_label: "theirs".into(),
            include_base: false,
        }
    }
}

/// Line-granularity three-way merge. Holds only marker options, so one
/// instance can serve concurrent merges.
#[derive(Debug, Clone, Default)]
pub struct ThreeWayMerge {
    options: MergeOptions,
}

impl ThreeWayMerge {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merge three texts. Lines keep their original terminators, so the
    /// merged content reproduces line endings exactly.
    pub fn merge_text(
        &self,
        common: &str,
        local: &str,
        latest: &str,
    ) -> Result<MergeOutcome, MergeError> {
        for (side, text) in [("common", common), ("local", local), ("latest", latest)] {
            if text.contains('\0') {
                return Err(MergeError::BinaryInput { side });
            }
        }

        let common: Vec<&str> = common.split_inclusive('\n').collect();
        let local: Vec<&str> = local.split_inclusive('\n').collect();
        let latest: Vec<&str> = latest.split_inclusive('\n').collect();
        Ok(self.merge_segments(&common, &local, &latest))
    }

    /// Merge three sequences of lines given without terminators. Every line
    /// of the merged content ends with `\n`.
    pub fn merge_lines(&self, common: &[&str], local: &[&str], latest: &[&str]) -> MergeOutcome {
        let terminate = |lines: &[&str]| -> Vec<String> {
            lines.iter().map(|line| format!("{}\n", line)).collect()
        };
        let common = terminate(common);
        let local = terminate(local);
        let latest = terminate(latest);
        fn as_refs(lines: &[String]) -> Vec<&str> {
            lines.iter().map(String::as_str).collect()
        }
        self.merge_segments(&as_refs(&common), &as_refs(&local), &as_refs(&latest))
    }

    /// Whether the three texts merge without conflicting lines.
    pub fn can_auto_merge(&self, common: &str, local: &str, latest: &str) -> bool {
        self.merge_text(common, local, latest)
            .map(|outcome| !outcome.has_conflicts())
            .unwrap_or(false)
    }

    fn merge_segments(&self, common: &[&str], local: &[&str], latest: &[&str]) -> MergeOutcome {
        info!(
            common = common.len(),
            local = local.len(),
            latest = latest.len(),
            "performing three-way merge"
        );

        let local_edits = edits(&align(common, local), local.len());
        let latest_edits = edits(&align(common, latest), latest.len());
        let mut out = Output::default();
        let mut summary = MergeSummary::default();

        let mut pos = 0;
        for region in regions(local_edits, latest_edits) {
            let unchanged = &common[pos..region.base.start];
            out.extend(unchanged);
            summary.common_lines += unchanged.len();

            self.merge_chunk(
                &common[region.base.clone()],
                &replay(common, local, &region.base, &region.local),
                &replay(common, latest, &region.base, &region.latest),
                &mut out,
                &mut summary,
            );
            pos = region.base.end;
        }
        let unchanged = &common[pos..];
        out.extend(unchanged);
        summary.common_lines += unchanged.len();

        debug!(?summary, "three-way merge complete");
        MergeOutcome {
            content: out.text,
            summary,
            conflict_markers: out.markers,
        }
    }

    fn merge_chunk(
        &self,
        base: &[&str],
        local: &[&str],
        latest: &[&str],
        out: &mut Output,
        summary: &mut MergeSummary,
    ) {
        let local_changed = local != base;
        let latest_changed = latest != base;

        match (local_changed, latest_changed) {
            (false, false) => {
                out.extend(base);
                summary.common_lines += base.len();
            }
            (true, false) => {
                out.extend(local);
                summary.local_changed_lines += base.len().max(local.len());
            }
            (false, true) => {
                out.extend(latest);
                summary.latest_changed_lines += base.len().max(latest.len());
            }
            (true, true) if local == latest => {
                out.extend(local);
                summary.common_changed_lines += base.len().max(local.len());
            }
            (true, true) => {
                let start_line = out.marker(&format!("<<<<<<< {}", self.options.local_label));
                out.extend(local);
                if self.options.include_base {
                    out.marker("||||||| base");
                    out.extend(base);
                }
                out.marker("=======");
                out.extend(latest);
                let end_line = out.marker(&format!(">>>>>>> {}", self.options.latest_label));
                out.markers.push(ConflictMarker {
                    start_line,
                    end_line,
                });

                summary.conflicting_lines += base.len().max(local.len()).max(latest.len());
                summary.conflict_count += 1;
            }
        }
    }
}

/// A stretch of the ancestor that one side replaced with `side` lines.
/// Pure insertions have an empty `base` range.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    base: Range<usize>,
    side: Range<usize>,
}

/// The edits that turn the ancestor into one side, in ancestor order.
fn edits(aligned: &[Option<usize>], side_len: usize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let (mut base_pos, mut side_pos) = (0, 0);
    for (i, matched) in aligned.iter().enumerate() {
        if let Some(j) = *matched {
            if i > base_pos || j > side_pos {
                edits.push(Edit {
                    base: base_pos..i,
                    side: side_pos..j,
                });
            }
            base_pos = i + 1;
            side_pos = j + 1;
        }
    }
    if aligned.len() > base_pos || side_len > side_pos {
        edits.push(Edit {
            base: base_pos..aligned.len(),
            side: side_pos..side_len,
        });
    }
    edits
}

/// Ancestor stretch touched by overlapping edits of either side.
#[derive(Debug)]
struct Region {
    base: Range<usize>,
    local: Vec<Edit>,
    latest: Vec<Edit>,
}

/// Two ancestor ranges clash when they share a line, when one inserts
/// strictly inside the other, or when both insert at the same point.
fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    if a.is_empty() && b.is_empty() {
        return a.start == b.start;
    }
    a.start < b.end && b.start < a.end
}

/// Group the edits of both sides into regions. Edits of one side never
/// overlap each other, so a region with edits on a single side holds just
/// that edit.
fn regions(local: Vec<Edit>, latest: Vec<Edit>) -> Vec<Region> {
    let mut all: Vec<(bool, Edit)> = local
        .into_iter()
        .map(|edit| (true, edit))
        .chain(latest.into_iter().map(|edit| (false, edit)))
        .collect();
    all.sort_by_key(|(_, edit)| (edit.base.start, edit.base.end));

    let mut regions: Vec<Region> = Vec::new();
    for (is_local, edit) in all {
        let extends = regions
            .last()
            .is_some_and(|region| overlaps(&region.base, &edit.base));
        if !extends {
            regions.push(Region {
                base: edit.base.clone(),
                local: Vec::new(),
                latest: Vec::new(),
            });
        }
        let Some(region) = regions.last_mut() else {
            continue;
        };
        region.base.end = region.base.end.max(edit.base.end);
        if is_local {
            region.local.push(edit);
        } else {
            region.latest.push(edit);
        }
    }
    regions
}

/// One side's lines for the ancestor stretch `range`.
fn replay<'a>(
    common: &[&'a str],
    side: &[&'a str],
    range: &Range<usize>,
    edits: &[Edit],
) -> Vec<&'a str> {
    let mut lines = Vec::new();
    let mut pos = range.start;
    for edit in edits {
        lines.extend_from_slice(&common[pos..edit.base.start]);
        lines.extend_from_slice(&side[edit.side.clone()]);
        pos = edit.base.end;
    }
    lines.extend_from_slice(&common[pos..range.end]);
    lines
}

/// Merged text under construction.
#[derive(Default)]
struct Output {
    text: String,
    lines: usize,
    markers: Vec<ConflictMarker>,
}

impl Output {
    fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.lines += 1;
    }

    fn extend(&mut self, lines: &[&str]) {
        for line in lines {
            self.push(line);
        }
    }

    /// Append a marker on its own line; returns its 1-indexed line number.
    fn marker(&mut self, marker: &str) -> usize {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(marker);
        self.text.push('\n');
        self.lines += 1;
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(base: &str, ours: &str, theirs: &str) -> MergeOutcome {
        ThreeWayMerge::default().merge_text(base, ours, theirs).unwrap()
    }

    #[test]
    fn test_identical_files() {
        let base = "line1\nline2\nline3\n";
        let result = merge(base, base, base);
        assert!(!result.has_conflicts());
        assert!(result.conflict_markers.is_empty());
        assert_eq!(result.content, base);
        assert_eq!(result.summary.common_lines, 3);
    }

    #[test]
    fn test_only_local_changed() {
        let base = "line1\nline2\nline3\n";
        let ours = "line1\nmodified\nline3\n";
        let result = merge(base, ours, base);
        assert!(!result.has_conflicts());
        assert_eq!(result.content, ours);
        assert_eq!(result.summary.local_changed_lines, 1);
        assert_eq!(result.summary.latest_changed_lines, 0);
    }

    #[test]
    fn test_only_latest_changed() {
        let base = "line1\nline2\nline3\n";
        let theirs = "line1\nline2\nmodified\n";
        let result = merge(base, base, theirs);
        assert!(!result.has_conflicts());
        assert_eq!(result.content, theirs);
        assert_eq!(result.summary.latest_changed_lines, 1);
        assert_eq!(result.summary.common_lines, 2);
    }

    #[test]
    fn test_non_overlapping_changes() {
        let base = "aaa\nbbb\nccc\nddd\neee\n";
        let ours = "AAA\nbbb\nccc\nddd\neee\n";
        let theirs = "aaa\nbbb\nccc\nddd\nEEE\n";
        let result = merge(base, ours, theirs);
        assert!(!result.has_conflicts());
        assert_eq!(result.content, "AAA\nbbb\nccc\nddd\nEEE\n");
        assert_eq!(
            result.summary,
            MergeSummary {
                common_lines: 3,
                local_changed_lines: 1,
                latest_changed_lines: 1,
                common_changed_lines: 0,
                conflicting_lines: 0,
                conflict_count: 0,
            }
        );
    }

    #[test]
    fn test_adjacent_changes_still_merge() {
        let base = "a\nb\nc\nd\n";
        let ours = "a\nB\nc\nd\n";
        let theirs = "a\nb\nC\nd\n";
        let result = merge(base, ours, theirs);
        assert!(!result.has_conflicts());
        assert_eq!(result.content, "a\nB\nC\nd\n");
    }

    #[test]
    fn test_adjacent_changes_are_counted_per_side() {
        let result = merge("a\nb\nc\nd\n", "a\nB\nc\nd\n", "a\nb\nC\nd\n");
        assert_eq!(
            result.summary,
            MergeSummary {
                common_lines: 2,
                local_changed_lines: 1,
                latest_changed_lines: 1,
                common_changed_lines: 0,
                conflicting_lines: 0,
                conflict_count: 0,
            }
        );
        assert!(result.conflict_markers.is_empty());
    }

    #[test]
    fn test_insertion_inside_other_sides_change_conflicts() {
        let result = merge("a\nb\nc\nd\n", "a\nX\nY\nd\n", "a\nb\nZ\nc\nd\n");
        assert!(result.has_conflicts());
        assert_eq!(
            result.content,
            "a\n<<<<<<< yours\nX\nY\n=======\nb\nZ\nc\n>>>>>>> theirs\nd\n"
        );
        assert_eq!(result.summary.conflicting_lines, 3);
        assert_eq!(result.summary.conflict_count, 1);
        assert_eq!(result.summary.common_lines, 2);
    }

    #[test]
    fn test_insertion_next_to_other_sides_change_merges() {
        let result = merge("a\nb\nc\n", "a\nB\nc\n", "a\nb\nX\nc\n");
        assert!(!result.has_conflicts());
        assert_eq!(result.content, "a\nB\nX\nc\n");
        assert_eq!(result.summary.local_changed_lines, 1);
        assert_eq!(result.summary.latest_changed_lines, 1);
    }

    #[test]
    fn test_conflicting_changes() {
        let base = "line1\noriginal\nline3\n";
        let ours = "line1\nours_version\nline3\n";
        let theirs = "line1\ntheirs_version\nline3\n";
        let result = merge(base, ours, theirs);
        assert!(result.has_conflicts());
        assert_eq!(
            result.content,
            "line1\n<<<<<<< yours\nours_version\n=======\ntheirs_version\n>>>>>>> theirs\nline3\n"
        );
        assert_eq!(
            result.conflict_markers,
            vec![ConflictMarker {
                start_line: 2,
                end_line: 6
            }]
        );
        assert_eq!(result.summary.conflicting_lines, 1);
        assert_eq!(result.summary.conflict_count, 1);
        assert_eq!(result.summary.common_lines, 2);
    }

    #[test]
    fn test_conflict_with_base_section_and_labels() {
        let engine = ThreeWayMerge::new(MergeOptions {
            local_label: "workspace".into(),
            latest_label: "server".into(),
            include_base: true,
        });
        let result = engine.merge_text("x\n", "y\n", "z\n").unwrap();
        assert_eq!(
            result.content,
            "<<<<<<< workspace\ny\n||||||| base\nx\n=======\nz\n>>>>>>> server\n"
        );
    }

    #[test]
    fn test_conflict_marker_after_unterminated_line() {
        let result = merge("a", "b", "c");
        assert_eq!(result.content, "<<<<<<< yours\nb\n=======\nc\n>>>>>>> theirs\n");
    }

    #[test]
    fn test_same_change_both_sides() {
        let result = merge("old\nkeep\n", "new\nkeep\n", "new\nkeep\n");
        assert!(!result.has_conflicts());
        assert_eq!(result.content, "new\nkeep\n");
        assert_eq!(result.summary.common_changed_lines, 1);
        assert_eq!(result.summary.common_lines, 1);
    }

    #[test]
    fn test_identical_sides_account_for_every_line() {
        let base = ["a", "b", "c", "d", "e", "f"];
        let side = ["a", "B", "c", "D", "E", "f"];
        let result = ThreeWayMerge::default().merge_lines(&base, &side, &side);
        assert_eq!(result.summary.conflicting_lines, 0);
        assert_eq!(result.summary.local_changed_lines, 0);
        assert_eq!(result.summary.latest_changed_lines, 0);
        assert_eq!(
            result.summary.common_lines + result.summary.common_changed_lines,
            base.len()
        );
        assert_eq!(result.content, "a\nB\nc\nD\nE\nf\n");
    }

    #[test]
    fn test_deterministic() {
        let base = "a\nb\nc\nd\ne\nf\ng\n";
        let ours = "a\nx\nc\nd\ny\nf\ng\nh\n";
        let theirs = "a\nz\nc\nq\ne\nf\n";
        let first = merge(base, ours, theirs);
        for _ in 0..5 {
            assert_eq!(merge(base, ours, theirs), first);
        }
    }

    #[test]
    fn test_insertions_at_same_point_conflict() {
        let result = merge("a\nb\n", "a\nmine\nb\n", "a\nyours\nb\n");
        assert!(result.has_conflicts());
        assert_eq!(result.summary.conflicting_lines, 1);
        assert_eq!(result.summary.common_lines, 2);
    }

    #[test]
    fn test_deletion_on_one_side() {
        let result = merge("a\nb\nc\n", "a\nc\n", "a\nb\nc\nd\n");
        assert!(!result.has_conflicts());
        assert_eq!(result.content, "a\nc\nd\n");
    }

    #[test]
    fn test_binary_input_rejected() {
        let err = ThreeWayMerge::default()
            .merge_text("a\n", "a\0b\n", "a\n")
            .unwrap_err();
        assert!(matches!(err, MergeError::BinaryInput { side: "local" }));
    }

    #[test]
    fn test_can_auto_merge() {
        let engine = ThreeWayMerge::default();
        let base = "aaa\nbbb\nccc\n";
        assert!(engine.can_auto_merge(base, base, base));
        assert!(engine.can_auto_merge(base, "AAA\nbbb\nccc\n", base));
        assert!(engine.can_auto_merge(base, "XXX\nbbb\nccc\n", "XXX\nbbb\nccc\n"));
        assert!(!engine.can_auto_merge(
            "line1\noriginal\nline3\n",
            "line1\nours\nline3\n",
            "line1\ntheirs\nline3\n"
        ));
    }

    #[test]
    fn test_unified_patch_describes_local_change() {
        let base = "a\nb\nc\n";
        let local = "a\nb\nc\n";
        let latest = "a\nB\nc\n";
        let result = merge(base, local, latest);
        let patch = result.unified_patch(local);
        assert!(patch.contains("-b"));
        assert!(patch.contains("+B"));
    }
}
