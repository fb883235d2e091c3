//! floe: incremental MOR to COW table compaction.
//!
//! Converts append/delete-heavy, multi-version source tables into
//! compacted single-version destination tables, one cycle at a time. A
//! cycle truncates the source, walks the version lineage committed since
//! the last checkpoint, and merges each truncate boundary's accumulated
//! data into the destination under a stage/publish two-phase commit. The
//! checkpoint is the published boundary id, recorded in the destination
//! table's own version metadata, so every step is safe to re-run after a
//! crash.
//!
//! The table store itself (catalog, storage, merge execution) is the
//! host's collaborator, provided through the [`TableStore`] trait.

pub mod apply;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod tracing;

// Re-export commonly used items
pub use apply::BoundaryApplier;
pub use checkpoint::{CheckpointStore, is_already_published_message};
pub use config::{Config, MetricsConfig};
pub use error::{CompactionError, ConfigError, MetricsError, StoreError};
pub use pipeline::{CycleOutcome, FleetReport, TableCompactor, run_fleet};
pub use schema::{AlignAction, ColumnType, TableSchema, plan_alignment};
pub use snapshot::{
    Lineage, Operation, Statistics, Version, VersionId, is_truncate_boundary, resolve_head, walk,
};
pub use store::{InMemoryStore, PublishOutcome, TableIdent, TableStore};
pub use tracing::init_tracing;
