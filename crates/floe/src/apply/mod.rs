//! Boundary application: the two-phase commit unit.
//!
//! For a confirmed boundary `t` with parent `h`, stages the destination
//! write under token `t`, performs either the initial copy or a
//! schema-aligned upsert merge of the source evaluated at `h`, then
//! publishes `t`. Every step is re-entrant: creation tolerates "already
//! exists", alignment is additive, the merge is keyed, and publish
//! tolerates duplicates, so a retried call from the start is always safe.

use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::CompactionError;
use crate::schema::{apply_alignment, plan_alignment};
use crate::snapshot::{Version, VersionId};
use crate::store::{TableIdent, TableStore};

/// Applies one boundary's worth of accumulated source data to the
/// destination table.
pub struct BoundaryApplier<'a> {
    store: &'a dyn TableStore,
    source: &'a TableIdent,
    dest: &'a TableIdent,
    dest_location: &'a str,
    match_key: &'a str,
    window: usize,
}

impl<'a> BoundaryApplier<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        source: &'a TableIdent,
        dest: &'a TableIdent,
        dest_location: &'a str,
        match_key: &'a str,
        window: usize,
    ) -> Self {
        Self {
            store,
            source,
            dest,
            dest_location,
            match_key,
            window,
        }
    }

    /// Apply the boundary: copy or merge the source at the boundary's
    /// parent into the destination, then publish the boundary id as the
    /// new checkpoint token.
    pub async fn apply(&self, boundary: &Version) -> Result<(), CompactionError> {
        let token = boundary.id;
        let Some(high_water) = boundary.parent_id else {
            // A boundary with no parent has no accumulated data behind it.
            warn!(
                target = %self.source,
                boundary = %token,
                "Boundary has no parent version; nothing to merge"
            );
            return Ok(());
        };

        info!(
            target = %self.source,
            boundary = %token,
            high_water = %high_water,
            "Applying boundary"
        );

        let result = self.stage_and_publish(token, high_water).await;
        if result.is_err() {
            // The staging token is session-scoped; a leftover would bleed
            // into whatever this session touches next.
            if let Err(clear_err) = self.store.stage_token(None).await {
                warn!(
                    target = %self.dest,
                    error = %clear_err,
                    "Failed to clear staging token after error"
                );
            }
        }
        result
    }

    async fn stage_and_publish(
        &self,
        token: VersionId,
        high_water: VersionId,
    ) -> Result<(), CompactionError> {
        let checkpoints = CheckpointStore::new(self.store, self.dest, self.window);

        let dest_is_fresh = !self.store.exists(self.dest).await?
            || self.store.recent_versions(self.dest, 1).await?.is_empty();

        checkpoints.stage(token).await?;

        if dest_is_fresh {
            info!(
                target = %self.dest,
                source_version = %high_water,
                "Destination missing or empty; creating baseline copy"
            );
            self.store
                .create_as_copy(self.dest, self.dest_location, self.source, high_water)
                .await?;
        } else {
            let source_schema = self.store.schema_of(self.source, Some(high_water)).await?;
            let dest_schema = self.store.schema_of(self.dest, None).await?;
            let actions = plan_alignment(&source_schema, &dest_schema);
            apply_alignment(self.store, self.dest, &actions).await?;

            info!(
                target = %self.dest,
                source_version = %high_water,
                "Merging source into destination"
            );
            self.store
                .upsert_merge(self.dest, self.source, high_water, self.match_key)
                .await?;
        }

        checkpoints.publish(token).await?;
        checkpoints.clear().await?;
        Ok(())
    }
}
