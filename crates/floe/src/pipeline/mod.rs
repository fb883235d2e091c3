//! Per-table compaction cycles and the fleet driver.
//!
//! One cycle per table: resume from the destination's recorded checkpoint,
//! force a fresh truncate boundary on the source, walk the lineage since
//! the checkpoint, and apply every confirmed boundary strictly in
//! chronological order. The fleet driver runs a cycle for every eligible
//! source table, isolating failures per table.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::apply::BoundaryApplier;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::emit;
use crate::error::CompactionError;
use crate::metrics::events::{
    BoundaryApplied, CompactionCycleCompleted, LineageWalked, SyntheticBoundaryApplied,
    TableCycleFailed,
};
use crate::snapshot::{is_truncate_boundary, resolve_head, walk};
use crate::store::{TableIdent, TableStore};

/// What a single table's cycle ended up doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Confirmed boundaries applied, in chronological order.
    pub boundaries_applied: usize,
    /// Whether the head was processed as a synthetic boundary because no
    /// version classified.
    pub synthetic: bool,
}

/// Runs one compaction cycle for a single source table.
pub struct TableCompactor<'a> {
    store: &'a dyn TableStore,
    source: TableIdent,
    dest: TableIdent,
    dest_location: String,
    match_key: String,
    window: usize,
}

impl<'a> TableCompactor<'a> {
    pub fn new(store: &'a dyn TableStore, config: &Config, source_name: &str) -> Self {
        let source = config.source_table(source_name);
        let (dest, dest_location) = config.destination_for(source_name);
        Self {
            store,
            source,
            dest,
            dest_location,
            match_key: config.primary_key.clone(),
            window: config.recent_versions_window,
        }
    }

    /// The source table this compactor works on.
    pub fn source(&self) -> &TableIdent {
        &self.source
    }

    /// The destination table this compactor writes to.
    pub fn dest(&self) -> &TableIdent {
        &self.dest
    }

    /// Run one full compaction cycle.
    ///
    /// Safe to re-run at any point: a killed cycle resumes through the
    /// checkpoint recorded in the destination, and re-publishing an
    /// already-published token is a no-op.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CompactionError> {
        let start = Instant::now();
        let checkpoints = CheckpointStore::new(self.store, &self.dest, self.window);

        // Finalize any half-done previous run before doing new work.
        let checkpoint = checkpoints.last_published().await?;
        match checkpoint {
            Some(token) => {
                info!(
                    target = %self.source,
                    token = %token,
                    "Found recorded checkpoint; re-publishing to finalize any half-done run"
                );
                checkpoints.publish(token).await?;
            }
            None => {
                info!(target = %self.source, "No checkpoint found; starting from earliest history");
            }
        }

        // Force a fresh boundary so this cycle has a defined high-water mark.
        self.store.truncate(&self.source).await?;

        let Some(head) = resolve_head(self.store, &self.source, self.window).await? else {
            info!(target = %self.source, "No versions found; nothing to do");
            return Ok(CycleOutcome::default());
        };

        let lineage = walk(self.store, &self.source, head.id, checkpoint).await?;
        if lineage.is_empty() {
            info!(
                target = %self.source,
                "No versions between checkpoint and current truncate; nothing to do"
            );
            return Ok(CycleOutcome::default());
        }
        emit!(LineageWalked {
            table: self.source.to_string(),
            versions: lineage.chain.len(),
        });

        let applier = BoundaryApplier::new(
            self.store,
            &self.source,
            &self.dest,
            &self.dest_location,
            &self.match_key,
            self.window,
        );

        // Each boundary's merge leaves the destination state the next
        // boundary's merge builds on; order is load-bearing.
        let mut applied = 0;
        for version in &lineage.chain {
            if !is_truncate_boundary(version, lineage.parent_of(version)) {
                continue;
            }
            applier.apply(version).await?;
            applied += 1;
            emit!(BoundaryApplied {
                table: self.source.to_string(),
            });
        }

        let mut synthetic = false;
        if applied == 0 {
            warn!(
                target = %self.source,
                head = %head.id,
                "No truncate boundaries detected by signature; processing head once as boundary"
            );
            applier.apply(&head).await?;
            synthetic = true;
            emit!(SyntheticBoundaryApplied {
                table: self.source.to_string(),
            });
        }

        let duration = start.elapsed();
        emit!(CompactionCycleCompleted {
            table: self.source.to_string(),
            duration,
        });
        info!(
            target = %self.source,
            boundaries = applied,
            synthetic,
            duration_ms = duration.as_millis(),
            "Compaction cycle complete"
        );
        Ok(CycleOutcome {
            boundaries_applied: applied,
            synthetic,
        })
    }
}

/// Per-table results of a fleet run.
#[derive(Debug, Default)]
pub struct FleetReport {
    /// Tables whose cycle completed, sorted by name.
    pub succeeded: Vec<String>,
    /// Tables whose cycle failed, with the failure reason, sorted by name.
    pub failed: Vec<(String, String)>,
}

impl FleetReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Compact every eligible table in the source namespace.
///
/// Tables already carrying the destination suffix are skipped. Cycles run
/// concurrently up to `max_concurrent_tables`; a failing table is recorded
/// in the report and never aborts the rest of the batch.
pub async fn run_fleet(
    store: Arc<dyn TableStore>,
    config: &Config,
) -> Result<FleetReport, CompactionError> {
    store
        .ensure_namespace(&config.destination_namespace)
        .await?;

    let names = store.list_tables(&config.source_namespace).await?;
    let sources: Vec<String> = names
        .into_iter()
        .filter(|name| !config.is_destination_name(name))
        .collect();

    info!(
        namespace = %config.source_namespace,
        tables = sources.len(),
        concurrency = config.max_concurrent_tables,
        "Starting compaction fleet"
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tables));
    let mut handles: JoinSet<(String, Result<CycleOutcome, CompactionError>)> = JoinSet::new();

    for name in sources {
        let store = Arc::clone(&store);
        let config = config.clone();
        let semaphore = Arc::clone(&semaphore);
        handles.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let compactor = TableCompactor::new(store.as_ref(), &config, &name);
            let result = compactor.run_cycle().await;
            (name, result)
        });
    }

    let mut report = FleetReport::default();
    while let Some(joined) = handles.join_next().await {
        match joined {
            Ok((name, Ok(outcome))) => {
                info!(
                    target = %name,
                    boundaries = outcome.boundaries_applied,
                    synthetic = outcome.synthetic,
                    "Table compacted"
                );
                report.succeeded.push(name);
            }
            Ok((name, Err(e))) => {
                error!(target = %name, error = %e, "Table compaction failed");
                emit!(TableCycleFailed { table: name.clone() });
                report.failed.push((name, e.to_string()));
            }
            Err(e) => {
                error!(error = %e, "Table task panicked");
            }
        }
    }

    report.succeeded.sort();
    report.failed.sort();

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Compaction fleet complete"
    );
    for (name, reason) in &report.failed {
        warn!(target = %name, reason = %reason, "Failed table");
    }

    Ok(report)
}
