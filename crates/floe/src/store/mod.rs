//! The table store collaborator.
//!
//! This crate never manipulates rows itself: every durable effect goes
//! through the [`TableStore`] trait, which abstracts a catalog-backed
//! table format (Iceberg, Delta Lake, and the like) down to the operations
//! the compaction core actually needs. All persisted state, including the
//! checkpoint token, lives in the store's own version history.

pub mod memory;

pub use memory::InMemoryStore;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::{ColumnType, TableSchema};
use crate::snapshot::{Version, VersionId};

/// A table identifier within the store's catalog.
///
/// The catalog itself is bound per store instance, along with credentials
/// and endpoints; the core only ever names `namespace.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    pub namespace: String,
    pub name: String,
}

impl TableIdent {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Result of publishing a staged token.
///
/// `AlreadyPublished` is a success, not an error: re-publishing after a
/// crash between publish and acknowledgement is the normal recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    AlreadyPublished,
}

/// Operations the compaction core requires from a table store.
///
/// Implementations must make `create_as_copy` tolerate "already exists",
/// report "token already published" as [`PublishOutcome::AlreadyPublished`]
/// rather than an error, and keep `stage_token` session-scoped so that a
/// cleared token never affects later operations.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Whether the table exists in the catalog.
    async fn exists(&self, table: &TableIdent) -> Result<bool, StoreError>;

    /// Up to `limit` most recent versions, newest first. A table that does
    /// not exist yields an empty list, not an error.
    async fn recent_versions(
        &self,
        table: &TableIdent,
        limit: usize,
    ) -> Result<Vec<Version>, StoreError>;

    /// Fetch a single version by id.
    async fn version_by_id(
        &self,
        table: &TableIdent,
        id: VersionId,
    ) -> Result<Option<Version>, StoreError>;

    /// Remove all rows from the table, committing a new version.
    async fn truncate(&self, table: &TableIdent) -> Result<(), StoreError>;

    /// Create `dest` at `dest_location` as a full copy of `source`
    /// evaluated at `source_version`. Succeeds without effect when the
    /// destination already exists.
    async fn create_as_copy(
        &self,
        dest: &TableIdent,
        dest_location: &str,
        source: &TableIdent,
        source_version: VersionId,
    ) -> Result<(), StoreError>;

    /// Set (`Some`) or clear (`None`) the session-scoped staging token.
    /// While set, write operations commit as pending under the token and
    /// become visible only at publish.
    async fn stage_token(&self, token: Option<VersionId>) -> Result<(), StoreError>;

    /// Durably publish the changes staged under `token`.
    async fn publish_token(
        &self,
        dest: &TableIdent,
        token: VersionId,
    ) -> Result<PublishOutcome, StoreError>;

    /// The table's schema, optionally as of a specific version.
    async fn schema_of(
        &self,
        table: &TableIdent,
        at: Option<VersionId>,
    ) -> Result<TableSchema, StoreError>;

    /// Add a column. The column must not already exist.
    async fn add_column(
        &self,
        table: &TableIdent,
        name: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError>;

    /// Widen an existing column's type.
    async fn widen_column_type(
        &self,
        table: &TableIdent,
        name: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError>;

    /// Upsert the source table, evaluated at `source_version`, into the
    /// destination: rows matching on `match_key` are updated, the rest are
    /// inserted.
    async fn upsert_merge(
        &self,
        dest: &TableIdent,
        source: &TableIdent,
        source_version: VersionId,
        match_key: &str,
    ) -> Result<(), StoreError>;

    /// Names of all tables in the namespace, sorted.
    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>, StoreError>;

    /// Create the namespace if it is missing.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), StoreError>;
}
