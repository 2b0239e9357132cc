//! Line alignment used by the three-way merge.
//!
//! The edit script comes from `diffy` with no context lines; its hunks are
//! walked to report, for every line of the first sequence, the index of the
//! matching line in the second one.

use diffy::{DiffOptions, Line};

/// For each line of `old`, the index of the line in `new` it is aligned
/// with, or `None` when the line was deleted or replaced. Matched indices
/// are strictly increasing.
///
/// Every line except the last of each sequence must end with `\n`, so that
/// joining the lines and splitting them again yields the same sequence.
pub fn align(old: &[&str], new: &[&str]) -> Vec<Option<usize>> {
    let mut aligned = vec![None; old.len()];
    let old_text = old.concat();
    let new_text = new.concat();
    let patch = DiffOptions::new()
        .set_context_len(0)
        .create_patch(&old_text, &new_text);

    let (mut i, mut j) = (0, 0);
    for hunk in patch.hunks() {
        let old_start = zero_based(hunk.old_range().start(), hunk.old_range().is_empty());
        while i < old_start {
            keep(&mut aligned, &mut i, &mut j);
        }
        for line in hunk.lines() {
            match line {
                Line::Context(_) => keep(&mut aligned, &mut i, &mut j),
                Line::Delete(_) => i += 1,
                Line::Insert(_) => j += 1,
            }
        }
    }
    while i < old.len() && j < new.len() {
        keep(&mut aligned, &mut i, &mut j);
    }

    aligned
}

fn keep(aligned: &mut [Option<usize>], i: &mut usize, j: &mut usize) {
    if let Some(slot) = aligned.get_mut(*i) {
        *slot = Some(*j);
    }
    *i += 1;
    *j += 1;
}

/// Hunk ranges are 1-based, except that an empty range names the line
/// after which the insertion happens.
fn zero_based(start: usize, empty: bool) -> usize {
    if empty {
        start
    } else {
        start.saturating_sub(1)
    }
}
