//! Error types for floe.

use snafu::prelude::*;

use crate::schema::ColumnType;
use crate::snapshot::VersionId;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the config file.
    #[snafu(display("Failed to read config file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML.
    #[snafu(display("Failed to parse config YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// A required identifier is empty.
    #[snafu(display("Config field '{field}' must not be empty"))]
    EmptyField { field: &'static str },

    /// The per-fleet concurrency bound is zero.
    #[snafu(display("max_concurrent_tables must be at least 1"))]
    ZeroConcurrency,

    /// The recent-version scan window is zero.
    #[snafu(display("recent_versions_window must be at least 1"))]
    ZeroWindow,
}

/// Errors reported by the table store collaborator.
///
/// Everything the store reports is fatal for the current table's cycle;
/// the one recoverable condition ("token already published") is not an
/// error at all but the `AlreadyPublished` variant of
/// [`PublishOutcome`](crate::store::PublishOutcome).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The table does not exist in the catalog.
    #[snafu(display("Table not found: {table}"))]
    TableNotFound { table: String },

    /// A column type change that is not a supported widening.
    #[snafu(display(
        "Cannot change column '{column}' of {table} from {from} to {to}: not a widening"
    ))]
    InvalidTypeChange {
        table: String,
        column: String,
        from: ColumnType,
        to: ColumnType,
    },

    /// A store-side operation failed.
    #[snafu(display("{operation} failed on {table}: {message}"))]
    Execution {
        operation: &'static str,
        table: String,
        message: String,
    },
}

/// Errors that abort a single table's compaction cycle.
///
/// The fleet driver catches these per table; one table's failure never
/// aborts the rest of the batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompactionError {
    /// The table store reported a failure.
    #[snafu(display("Table store error: {source}"))]
    Store { source: StoreError },

    /// The version history contains a parent cycle.
    ///
    /// Version chains are expected to be acyclic; a repeated id means the
    /// store handed back corrupt metadata and walking must not continue.
    #[snafu(display("Version lineage of {table} revisits {version}: parent chain contains a cycle"))]
    LineageCycle { table: String, version: VersionId },
}

impl From<StoreError> for CompactionError {
    fn from(source: StoreError) -> Self {
        CompactionError::Store { source }
    }
}

/// Errors that can occur in the metrics subsystem.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Metrics have already been initialized.
    #[snafu(display("Metrics already initialized"))]
    AlreadyInitialized,

    /// Metrics have not been initialized.
    #[snafu(display("Metrics not initialized"))]
    NotInitialized,

    /// Failed to install the Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}
