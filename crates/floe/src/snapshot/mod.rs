//! Table version metadata.
//!
//! A table's history is a backward-linked chain of immutable [`Version`]
//! records. Each version carries an operation tag and a statistics summary
//! whose key vocabulary varies by execution engine; [`Statistics`] resolves
//! the known synonyms once, at construction, so the rest of the crate works
//! with typed accessors instead of raw key lookups.

pub mod boundary;
pub mod lineage;

pub use boundary::is_truncate_boundary;
pub use lineage::{Lineage, resolve_head, walk};

use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a single table version.
///
/// Opaque to the core apart from equality and ordering; the id of a
/// published boundary doubles as the checkpoint token recorded in the
/// destination table's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(i64);

impl VersionId {
    /// Create a version id from its raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw value.
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// The operation that produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Append,
    Delete,
    Overwrite,
    Replace,
    /// An operation tag this crate does not recognize.
    Other,
}

impl Operation {
    /// Parse an engine-reported operation tag, case-insensitively.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "append" => Operation::Append,
            "delete" => Operation::Delete,
            "overwrite" => Operation::Overwrite,
            "replace" => Operation::Replace,
            _ => Operation::Other,
        }
    }

    /// Whether this operation can denote wholesale removal of table
    /// contents. Engines report truncation as either `delete` or
    /// `overwrite` depending on version.
    pub fn is_wholesale_removal(self) -> bool {
        matches!(self, Operation::Delete | Operation::Overwrite)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Operation::Append => "append",
            Operation::Delete => "delete",
            Operation::Overwrite => "overwrite",
            Operation::Replace => "replace",
            Operation::Other => "other",
        };
        write!(f, "{tag}")
    }
}

/// Synonym vocabularies for each statistic, tried in order.
///
/// Different engines and versions emit different key spellings; these lists
/// are the accepted set per statistic. Absent keys mean "value unknown"
/// except where an accessor documents a zero default.
const ADDED_DATA_KEYS: &[&str] = &["added-data-files"];
const ADDED_DELETE_KEYS: &[&str] = &[
    "added-delete-files",
    "added-equality-delete-files",
    "added-position-delete-files",
];
const REMOVED_DATA_KEYS: &[&str] = &[
    "deleted-data-files",
    "removed-data-files",
    "deleted_files",
    "removed_files",
];
const REMOVED_DELETE_KEYS: &[&str] = &[
    "deleted-delete-files",
    "removed-delete-files",
    "deleted_delete_files",
    "removed_delete_files",
];
const TOTAL_DATA_KEYS: &[&str] = &["total-data-files"];
const TOTAL_DELETE_KEYS: &[&str] = &["total-delete-files", "total_delete_files"];

/// Typed view over a version's statistics summary.
///
/// Synonym lookup happens once here; unparseable values are treated the
/// same as absent keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    added_data_files: u64,
    added_delete_files: u64,
    removed_data_files: Option<u64>,
    removed_delete_files: Option<u64>,
    total_data_files: Option<u64>,
    total_delete_files: Option<u64>,
}

fn summary_int(summary: &HashMap<String, String>, key: &str) -> Option<u64> {
    summary.get(key).and_then(|v| v.trim().parse::<u64>().ok())
}

fn first_int(summary: &HashMap<String, String>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| summary_int(summary, k))
}

/// First non-zero value among the keys, else 0.
///
/// Used for added delete files, where an engine may report zero under one
/// spelling and the real count under another.
fn first_nonzero_int(summary: &HashMap<String, String>, keys: &[&str]) -> u64 {
    keys.iter()
        .filter_map(|k| summary_int(summary, k))
        .find(|v| *v != 0)
        .unwrap_or(0)
}

impl Statistics {
    /// Build typed statistics from an engine-reported summary map.
    pub fn from_summary(summary: &HashMap<String, String>) -> Self {
        Self {
            added_data_files: first_int(summary, ADDED_DATA_KEYS).unwrap_or(0),
            added_delete_files: first_nonzero_int(summary, ADDED_DELETE_KEYS),
            removed_data_files: first_int(summary, REMOVED_DATA_KEYS),
            removed_delete_files: first_int(summary, REMOVED_DELETE_KEYS),
            total_data_files: first_int(summary, TOTAL_DATA_KEYS),
            total_delete_files: first_int(summary, TOTAL_DELETE_KEYS),
        }
    }

    /// Data units added by this version. Absent is 0.
    pub fn added_data_files(&self) -> u64 {
        self.added_data_files
    }

    /// Delete markers added by this version. Absent is 0.
    pub fn added_delete_files(&self) -> u64 {
        self.added_delete_files
    }

    /// Data units removed by this version, if reported.
    pub fn removed_data_files(&self) -> Option<u64> {
        self.removed_data_files
    }

    /// Delete markers removed by this version, if reported.
    pub fn removed_delete_files(&self) -> Option<u64> {
        self.removed_delete_files
    }

    /// Data units in the table after this version, if reported.
    pub fn total_data_files(&self) -> Option<u64> {
        self.total_data_files
    }

    /// Delete markers in the table after this version, if reported.
    pub fn total_delete_files(&self) -> Option<u64> {
        self.total_delete_files
    }
}

/// One immutable record in a table's version history.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub id: VersionId,
    /// The previous version, or `None` for the root of the chain.
    pub parent_id: Option<VersionId>,
    pub committed_at: DateTime<Utc>,
    pub operation: Operation,
    pub statistics: Statistics,
    /// The stage/publish token recorded in this version's metadata, when
    /// the version was produced by a published commit. Stored as the raw
    /// metadata string; see
    /// [`CheckpointStore`](crate::checkpoint::CheckpointStore) for the
    /// parse-and-recover path.
    pub publish_token: Option<String>,
}
