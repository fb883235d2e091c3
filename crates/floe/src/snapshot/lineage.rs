//! Snapshot lineage walking.
//!
//! Reconstructs the ordered chain of versions committed since the last
//! published checkpoint by following parent links backward from the head.
//! The source store is required to keep a strictly linear history (at most
//! one child per version); the walker defends against cycles but not
//! against forks.

use std::collections::{HashMap, HashSet};

use snafu::ensure;
use tracing::debug;

use crate::error::{CompactionError, LineageCycleSnafu};
use crate::snapshot::{Version, VersionId, is_truncate_boundary};
use crate::store::{TableIdent, TableStore};

/// The versions committed since a checkpoint, oldest first, plus a by-id
/// lookup map carrying the checkpoint version itself for parent context.
#[derive(Debug, Default)]
pub struct Lineage {
    /// Chronologically ordered chain from just-after-checkpoint to head.
    pub chain: Vec<Version>,
    /// Every walked version by id, plus the checkpoint version when known.
    pub by_id: HashMap<VersionId, Version>,
}

impl Lineage {
    /// Whether there is nothing to process.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Parent of the given version, when it is known to this lineage.
    pub fn parent_of(&self, version: &Version) -> Option<&Version> {
        version.parent_id.and_then(|id| self.by_id.get(&id))
    }
}

/// Resolve the head version to walk from.
///
/// Writers may commit to the source immediately after our truncate, so the
/// newest version is not necessarily the truncate we just forced. Prefer
/// the newest version in the recent window that classifies as a truncate
/// boundary; fall back to the newest version outright. `None` means the
/// table has no versions at all.
pub async fn resolve_head(
    store: &dyn TableStore,
    table: &TableIdent,
    window: usize,
) -> Result<Option<Version>, CompactionError> {
    let recent = store.recent_versions(table, window).await?;
    if recent.is_empty() {
        return Ok(None);
    }

    let by_id: HashMap<VersionId, &Version> = recent.iter().map(|v| (v.id, v)).collect();
    for version in &recent {
        let parent = version.parent_id.and_then(|id| by_id.get(&id).copied());
        if is_truncate_boundary(version, parent) {
            return Ok(Some(version.clone()));
        }
    }

    Ok(Some(recent[0].clone()))
}

/// Walk parent links from `head` back to (but excluding) `checkpoint`,
/// returning the chain in chronological order.
///
/// Stops at the root, at the checkpoint (whether reached as a parent link
/// or as the head itself), or when the head version cannot be fetched.
/// A repeated id aborts with [`CompactionError::LineageCycle`].
pub async fn walk(
    store: &dyn TableStore,
    table: &TableIdent,
    head: VersionId,
    checkpoint: Option<VersionId>,
) -> Result<Lineage, CompactionError> {
    let mut by_id = HashMap::new();

    // Fetch the checkpoint version separately so the classifier has parent
    // context for the first unwalked version.
    if let Some(token) = checkpoint {
        if let Some(version) = store.version_by_id(table, token).await? {
            by_id.insert(version.id, version);
        }
    }

    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(head);

    while let Some(id) = cursor {
        if checkpoint == Some(id) {
            break;
        }
        ensure!(
            seen.insert(id),
            LineageCycleSnafu {
                table: table.to_string(),
                version: id,
            }
        );
        let Some(version) = store.version_by_id(table, id).await? else {
            break;
        };
        let parent_id = version.parent_id;
        by_id.insert(version.id, version.clone());
        chain.push(version);

        cursor = match parent_id {
            Some(parent) if checkpoint == Some(parent) => None,
            other => other,
        };
    }

    chain.reverse();
    debug!(
        target = %table,
        versions = chain.len(),
        checkpoint = ?checkpoint,
        "Walked version lineage"
    );
    Ok(Lineage { chain, by_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompactionError;
    use crate::schema::{ColumnType, TableSchema};
    use crate::store::memory::InMemoryStore;

    fn ident(name: &str) -> TableIdent {
        TableIdent::new("raw", name)
    }

    fn key_schema() -> TableSchema {
        [("_olake_id".to_string(), ColumnType::Utf8)]
            .into_iter()
            .collect()
    }

    async fn seeded_store(table: &TableIdent, appends: usize) -> (InMemoryStore, Vec<VersionId>) {
        let store = InMemoryStore::new();
        store.create_table(table, key_schema()).await;
        let mut ids = Vec::new();
        for i in 0..appends {
            let id = store
                .append_rows(table, &[(&format!("k{i}"), "v")])
                .await
                .unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_walk_to_root() {
        let table = ident("events");
        let (store, ids) = seeded_store(&table, 3).await;

        let lineage = walk(&store, &table, ids[2], None).await.unwrap();

        let walked: Vec<_> = lineage.chain.iter().map(|v| v.id).collect();
        assert_eq!(walked, ids);
        assert!(lineage.parent_of(&lineage.chain[1]).is_some());
    }

    #[tokio::test]
    async fn test_walk_stops_at_checkpoint_parent() {
        let table = ident("events");
        let (store, ids) = seeded_store(&table, 4).await;

        let lineage = walk(&store, &table, ids[3], Some(ids[1])).await.unwrap();

        let walked: Vec<_> = lineage.chain.iter().map(|v| v.id).collect();
        assert_eq!(walked, vec![ids[2], ids[3]]);
        // The checkpoint version itself is available for parent context.
        assert!(lineage.by_id.contains_key(&ids[1]));
    }

    #[tokio::test]
    async fn test_walk_from_checkpoint_head_is_empty() {
        let table = ident("events");
        let (store, ids) = seeded_store(&table, 2).await;

        let lineage = walk(&store, &table, ids[1], Some(ids[1])).await.unwrap();
        assert!(lineage.is_empty());
    }

    #[tokio::test]
    async fn test_walk_missing_head_is_empty() {
        let table = ident("events");
        let (store, _) = seeded_store(&table, 1).await;

        let lineage = walk(&store, &table, VersionId::new(9999), None).await.unwrap();
        assert!(lineage.is_empty());
    }

    #[tokio::test]
    async fn test_walk_aborts_on_cycle() {
        let table = ident("events");
        let (store, ids) = seeded_store(&table, 3).await;
        // Corrupt the chain: the oldest version points back at the head.
        store.set_parent(&table, ids[0], Some(ids[2])).await;

        let err = walk(&store, &table, ids[2], None).await.unwrap_err();
        assert!(matches!(err, CompactionError::LineageCycle { .. }));
    }

    #[tokio::test]
    async fn test_resolve_head_prefers_newest_truncate_boundary() {
        let table = ident("events");
        let (store, _) = seeded_store(&table, 2).await;
        let truncate_id = store.truncate_table(&table).await.unwrap();
        // A write that races in after the truncate.
        let late_append = store.append_rows(&table, &[("late", "v")]).await.unwrap();

        let head = resolve_head(&store, &table, 10).await.unwrap().unwrap();
        assert_eq!(head.id, truncate_id);
        assert_ne!(head.id, late_append);
    }

    #[tokio::test]
    async fn test_resolve_head_falls_back_to_newest() {
        let table = ident("events");
        let (store, ids) = seeded_store(&table, 3).await;

        let head = resolve_head(&store, &table, 10).await.unwrap().unwrap();
        assert_eq!(head.id, ids[2]);
    }

    #[tokio::test]
    async fn test_resolve_head_of_missing_table() {
        let store = InMemoryStore::new();
        let head = resolve_head(&store, &ident("absent"), 10).await.unwrap();
        assert!(head.is_none());
    }
}
