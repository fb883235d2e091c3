//! Checkpoint recovery and the stage/publish protocol.
//!
//! The checkpoint has no storage of its own: the id of the most recently
//! published boundary is embedded in the destination table's version
//! metadata by the stage/publish commit, and recovered by scanning the
//! destination's recent versions. Durability therefore equals destination
//! table durability, and publishing the same token twice is always safe.

use tracing::{info, warn};

use crate::emit;
use crate::error::StoreError;
use crate::metrics::events::PublishDuplicate;
use crate::snapshot::VersionId;
use crate::store::{PublishOutcome, TableIdent, TableStore};

/// Conditions a table store may report as an error when a token was in
/// fact already published. Adapters whose store surfaces the condition
/// only as error text should match against this allow-list and map hits to
/// [`PublishOutcome::AlreadyPublished`]:
///
/// - a duplicate request to publish a WAP id that was published already;
/// - a cherry-pick rejected because the staged snapshot cannot be applied;
/// - a cherry-pick rejected as not append, dynamic overwrite, or
///   fast-forward.
pub fn is_already_published_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    (message.contains("duplicate")
        && message.contains("wap")
        && message.contains("published already"))
        || message.contains("cannot cherry-pick")
        || message.contains("not append, dynamic overwrite, or fast-forward")
}

/// Recovers and advances the published-boundary token for one destination
/// table.
pub struct CheckpointStore<'a> {
    store: &'a dyn TableStore,
    dest: &'a TableIdent,
    /// How many recent destination versions to scan during recovery.
    window: usize,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(store: &'a dyn TableStore, dest: &'a TableIdent, window: usize) -> Self {
        Self {
            store,
            dest,
            window,
        }
    }

    /// The most recently published token, recovered from the destination's
    /// version metadata.
    ///
    /// Returns `None` when the destination does not exist, none of its
    /// recent versions carries a token, or the newest recorded token does
    /// not parse as a version id (in which case processing restarts from
    /// the beginning, which is safe but slower).
    pub async fn last_published(&self) -> Result<Option<VersionId>, StoreError> {
        let recent = self.store.recent_versions(self.dest, self.window).await?;
        for version in &recent {
            let Some(raw) = version.publish_token.as_deref() else {
                continue;
            };
            match raw.parse::<VersionId>() {
                Ok(token) => return Ok(Some(token)),
                Err(_) => {
                    warn!(
                        target = %self.dest,
                        token = %raw,
                        "Recorded checkpoint token does not parse as a version id; \
                         starting from the beginning"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Mark subsequent writes against the destination as staged under
    /// `token`. Session-scoped, not yet durable.
    pub async fn stage(&self, token: VersionId) -> Result<(), StoreError> {
        self.store.stage_token(Some(token)).await
    }

    /// Durably publish the changes staged under `token`.
    ///
    /// `AlreadyPublished` is success: it means a previous run crashed
    /// after publishing but before observing the result.
    pub async fn publish(&self, token: VersionId) -> Result<PublishOutcome, StoreError> {
        let outcome = self.store.publish_token(self.dest, token).await?;
        match outcome {
            PublishOutcome::Published => {
                info!(target = %self.dest, token = %token, "Published checkpoint token");
            }
            PublishOutcome::AlreadyPublished => {
                info!(
                    target = %self.dest,
                    token = %token,
                    "Checkpoint token already published (idempotent)"
                );
                emit!(PublishDuplicate {
                    table: self.dest.to_string(),
                });
            }
        }
        Ok(outcome)
    }

    /// Reset the session staging token so it cannot leak into an
    /// unrelated subsequent operation.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.stage_token(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, TableSchema};
    use crate::store::memory::InMemoryStore;

    #[test]
    fn test_allow_list_duplicate_wap_commit() {
        assert!(is_already_published_message(
            "DuplicateWAPCommitException: Duplicate request to cherry pick wap id \
             that was published already"
        ));
    }

    #[test]
    fn test_allow_list_cherry_pick_rejection() {
        assert!(is_already_published_message(
            "ValidationException: Cannot cherry-pick snapshot 42: not current ancestor"
        ));
    }

    #[test]
    fn test_allow_list_non_fast_forward() {
        assert!(is_already_published_message(
            "Cherry-pick of snapshot was rejected: not append, dynamic overwrite, \
             or fast-forward"
        ));
    }

    #[test]
    fn test_allow_list_rejects_other_errors() {
        assert!(!is_already_published_message("Table does not exist"));
        assert!(!is_already_published_message(
            "Duplicate column name in schema"
        ));
        assert!(!is_already_published_message("wap id not found"));
    }

    fn schema() -> TableSchema {
        [("_olake_id".to_string(), ColumnType::Utf8)]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_last_published_on_missing_table() {
        let store = InMemoryStore::new();
        let dest = TableIdent::new("cow", "absent_cow");
        let checkpoints = CheckpointStore::new(&store, &dest, 10);
        assert_eq!(checkpoints.last_published().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stage_publish_recover_roundtrip() {
        let store = InMemoryStore::new();
        let source = TableIdent::new("raw", "events");
        let dest = TableIdent::new("cow", "events_cow");
        store.create_table(&source, schema()).await;
        store.ensure_namespace("cow").await.unwrap();
        let v1 = store.append_rows(&source, &[("a", "1")]).await.unwrap();

        let checkpoints = CheckpointStore::new(&store, &dest, 10);
        let token = VersionId::new(41);
        checkpoints.stage(token).await.unwrap();
        store
            .create_as_copy(&dest, "mem://cow/events_cow", &source, v1)
            .await
            .unwrap();
        checkpoints.publish(token).await.unwrap();
        checkpoints.clear().await.unwrap();

        assert_eq!(checkpoints.last_published().await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_unparseable_token_degrades_to_no_checkpoint() {
        let store = InMemoryStore::new();
        let source = TableIdent::new("raw", "events");
        let dest = TableIdent::new("cow", "events_cow");
        store.create_table(&source, schema()).await;
        store.ensure_namespace("cow").await.unwrap();
        let v1 = store.append_rows(&source, &[("a", "1")]).await.unwrap();

        let checkpoints = CheckpointStore::new(&store, &dest, 10);
        let token = VersionId::new(41);
        checkpoints.stage(token).await.unwrap();
        store
            .create_as_copy(&dest, "mem://cow/events_cow", &source, v1)
            .await
            .unwrap();
        checkpoints.publish(token).await.unwrap();
        checkpoints.clear().await.unwrap();

        let dest_head = store.recent_versions(&dest, 1).await.unwrap()[0].id;
        store
            .set_publish_token(&dest, dest_head, Some("not-a-version-id"))
            .await;

        assert_eq!(checkpoints.last_published().await.unwrap(), None);
    }
}
