//! Configuration for the floe compaction fleet.
//!
//! One [`Config`] value describes a whole fleet run: where the source
//! tables live, where their compacted counterparts go, and the knobs of
//! the checkpoint protocol. There is no global mutable state; the value is
//! passed into the fleet driver and orchestrators explicitly.

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{ConfigError, EmptyFieldSnafu, ZeroConcurrencySnafu, ZeroWindowSnafu};
use crate::store::TableIdent;

fn default_primary_key() -> String {
    "_olake_id".to_string()
}

fn default_destination_suffix() -> String {
    "_cow".to_string()
}

fn default_recent_versions_window() -> usize {
    10
}

fn default_max_concurrent_tables() -> usize {
    1
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address for the Prometheus `/metrics` endpoint.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
        }
    }
}

/// Main configuration.
///
/// # Example
///
/// ```yaml
/// catalog: lakehouse
/// source_namespace: raw
/// destination_namespace: compacted
/// destination_base_location: s3://bucket/warehouse/cow
///
/// primary_key: _olake_id
/// max_concurrent_tables: 4
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Catalog the table store is bound to.
    pub catalog: String,
    /// Namespace holding the continuously written source tables.
    pub source_namespace: String,
    /// Namespace the compacted destination tables are created in.
    pub destination_namespace: String,
    /// Base storage location; each destination table lives under
    /// `<base>/<table><suffix>`.
    pub destination_base_location: String,
    /// Column the upsert merge matches records on.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Suffix appended to destination table names. Also used to skip
    /// destination tables when enumerating sources.
    #[serde(default = "default_destination_suffix")]
    pub destination_suffix: String,
    /// How many recent versions to scan when resolving heads and
    /// recovering checkpoints.
    #[serde(default = "default_recent_versions_window")]
    pub recent_versions_window: usize,
    /// Upper bound on tables compacted concurrently. Boundary
    /// applications within one table are always sequential.
    #[serde(default = "default_max_concurrent_tables")]
    pub max_concurrent_tables: usize,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("catalog", &self.catalog),
            ("source_namespace", &self.source_namespace),
            ("destination_namespace", &self.destination_namespace),
            ("destination_base_location", &self.destination_base_location),
            ("primary_key", &self.primary_key),
            ("destination_suffix", &self.destination_suffix),
        ] {
            ensure!(!value.trim().is_empty(), EmptyFieldSnafu { field });
        }
        ensure!(self.max_concurrent_tables >= 1, ZeroConcurrencySnafu);
        ensure!(self.recent_versions_window >= 1, ZeroWindowSnafu);
        Ok(())
    }

    /// Identifier of a source table by name.
    pub fn source_table(&self, name: &str) -> TableIdent {
        TableIdent::new(&self.source_namespace, name)
    }

    /// Destination identifier and storage location for a source table.
    pub fn destination_for(&self, source_name: &str) -> (TableIdent, String) {
        let dest_name = format!("{source_name}{}", self.destination_suffix);
        let location = format!(
            "{}/{dest_name}",
            self.destination_base_location.trim_end_matches('/')
        );
        (
            TableIdent::new(&self.destination_namespace, dest_name),
            location,
        )
    }

    /// Whether a table name is one of our own destination tables.
    pub fn is_destination_name(&self, name: &str) -> bool {
        name.ends_with(&self.destination_suffix)
    }
}
