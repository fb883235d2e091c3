//! Truncate-boundary classification.
//!
//! A boundary is a version produced by truncating the whole table: it
//! removed everything the parent held and added nothing. Classification is
//! a best-effort heuristic over version statistics only; there is no side
//! channel. When the statistics are too sparse to decide, the answer is
//! `false` and the caller falls back to synthetic-boundary processing.

use super::Version;

/// Decide whether `version` is a truncate boundary, given its parent for
/// before/after context.
///
/// The checks, in order, each short-circuiting to `false`:
/// - the operation must be a wholesale-removal tag;
/// - nothing may have been added (data or delete markers);
/// - when reported, the post-version totals must both be zero;
/// - when both sides are reported, the removed counts must equal the
///   parent's totals;
/// - finally, the removed data count must be strictly positive. Truncating
///   an already-empty table proves nothing, and an engine that reports no
///   removed count at all leaves the question undecidable.
pub fn is_truncate_boundary(version: &Version, parent: Option<&Version>) -> bool {
    if !version.operation.is_wholesale_removal() {
        return false;
    }

    let stats = &version.statistics;
    if stats.added_data_files() != 0 {
        return false;
    }
    if stats.added_delete_files() != 0 {
        return false;
    }

    if matches!(stats.total_data_files(), Some(total) if total != 0) {
        return false;
    }
    if matches!(stats.total_delete_files(), Some(total) if total != 0) {
        return false;
    }

    let removed = stats.removed_data_files();
    let parent_total = parent.and_then(|p| p.statistics.total_data_files());
    if let (Some(removed), Some(parent_total)) = (removed, parent_total) {
        if removed != parent_total {
            return false;
        }
    }

    let removed_deletes = stats.removed_delete_files();
    let parent_total_deletes = parent.and_then(|p| p.statistics.total_delete_files());
    if let (Some(removed), Some(parent_total)) = (removed_deletes, parent_total_deletes) {
        if removed != parent_total {
            return false;
        }
    }

    match removed {
        Some(removed) => removed > 0,
        None => false,
    }
}
