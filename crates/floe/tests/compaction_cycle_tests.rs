//! Integration tests for the compaction cycle and fleet driver.
//!
//! These run full per-table cycles against the in-memory table store,
//! covering checkpoint resume, boundary ordering, the synthetic-boundary
//! fallback, schema alignment, and per-table failure isolation.
//!
//! Run with: cargo test -p floe --test compaction_cycle_tests

use std::sync::Arc;

use floe::checkpoint::CheckpointStore;
use floe::config::Config;
use floe::error::CompactionError;
use floe::pipeline::{CycleOutcome, TableCompactor, run_fleet};
use floe::schema::{ColumnType, TableSchema};
use floe::store::{InMemoryStore, TableIdent, TableStore};

fn test_config() -> Config {
    Config::parse(
        r#"
catalog: lakehouse
source_namespace: raw
destination_namespace: compacted
destination_base_location: mem://warehouse/cow
"#,
    )
    .unwrap()
}

fn key_schema() -> TableSchema {
    [("_olake_id".to_string(), ColumnType::Utf8)]
        .into_iter()
        .collect()
}

async fn seed_source(store: &InMemoryStore, name: &str) -> TableIdent {
    let table = TableIdent::new("raw", name);
    store.create_table(&table, key_schema()).await;
    table
}

#[tokio::test]
async fn test_first_cycle_creates_destination_as_copy() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    store.append_rows(&source, &[("a", "1")]).await.unwrap();
    store.append_rows(&source, &[("b", "2")]).await.unwrap();

    let compactor = TableCompactor::new(&store, &config, "events");
    let outcome = compactor.run_cycle().await.unwrap();

    assert_eq!(outcome.boundaries_applied, 1);
    assert!(!outcome.synthetic);

    let dest = TableIdent::new("compacted", "events_cow");
    assert!(store.exists(&dest).await.unwrap());
    assert_eq!(
        store.location(&dest).await.unwrap(),
        "mem://warehouse/cow/events_cow"
    );

    let rows = store.rows(&dest).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.get("a").map(String::as_str), Some("1"));
    assert_eq!(rows.get("b").map(String::as_str), Some("2"));

    // The source was truncated and the truncate id is now the checkpoint.
    assert!(store.rows(&source).await.unwrap().is_empty());
    let checkpoints = CheckpointStore::new(&store, &dest, 10);
    let token = checkpoints.last_published().await.unwrap().unwrap();
    let boundary = store.version_by_id(&source, token).await.unwrap().unwrap();
    assert!(boundary.statistics.removed_data_files().unwrap() > 0);
}

#[tokio::test]
async fn test_resume_equivalence() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();
    store.append_rows(&source, &[("a", "1")]).await.unwrap();

    let compactor = TableCompactor::new(&store, &config, "events");
    let first = compactor.run_cycle().await.unwrap();
    assert_eq!(first.boundaries_applied, 1);

    let dest = TableIdent::new("compacted", "events_cow");
    let versions_after_first = store.version_count(&dest).await;
    let rows_after_first = store.rows(&dest).await.unwrap();

    // Nothing new arrived: the re-run must apply nothing and leave the
    // destination byte-for-byte alone.
    let second = compactor.run_cycle().await.unwrap();
    assert_eq!(second, CycleOutcome::default());
    assert_eq!(store.version_count(&dest).await, versions_after_first);
    assert_eq!(store.rows(&dest).await.unwrap(), rows_after_first);
}

#[tokio::test]
async fn test_boundaries_apply_oldest_first() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    // Two generations of data, the older one already truncated.
    store.append_rows(&source, &[("a", "1")]).await.unwrap();
    let t1 = store.truncate_table(&source).await.unwrap();
    store.append_rows(&source, &[("b", "2")]).await.unwrap();

    let compactor = TableCompactor::new(&store, &config, "events");
    let outcome = compactor.run_cycle().await.unwrap();
    assert_eq!(outcome.boundaries_applied, 2);

    let dest = TableIdent::new("compacted", "events_cow");
    let rows = store.rows(&dest).await.unwrap();
    assert_eq!(rows.len(), 2);

    // The destination's commit order must mirror boundary age: the copy
    // published under t1 strictly before the merge published under the
    // cycle's own truncate.
    let recent = store.recent_versions(&dest, 10).await.unwrap();
    let tokens: Vec<String> = recent
        .iter()
        .rev()
        .filter_map(|v| v.publish_token.clone())
        .collect();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0], t1.to_string());
    let t2: floe::VersionId = tokens[1].parse().unwrap();
    assert!(t2 > t1);
}

#[tokio::test]
async fn test_matched_records_are_updated() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    store.append_rows(&source, &[("a", "1")]).await.unwrap();
    let compactor = TableCompactor::new(&store, &config, "events");
    compactor.run_cycle().await.unwrap();

    // The same key arrives again with a new value.
    store.append_rows(&source, &[("a", "42")]).await.unwrap();
    compactor.run_cycle().await.unwrap();

    let dest = TableIdent::new("compacted", "events_cow");
    let rows = store.rows(&dest).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.get("a").map(String::as_str), Some("42"));
}

#[tokio::test]
async fn test_fallback_applies_head_once() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    // An engine that never reports removed-file counts makes every
    // boundary undecidable.
    store.set_report_removed_statistics(false).await;
    store.append_rows(&source, &[("a", "1")]).await.unwrap();

    let compactor = TableCompactor::new(&store, &config, "events");
    let outcome = compactor.run_cycle().await.unwrap();

    assert_eq!(outcome.boundaries_applied, 0);
    assert!(outcome.synthetic);

    // Progress was not lost: the head's parent still got compacted.
    let dest = TableIdent::new("compacted", "events_cow");
    let rows = store.rows(&dest).await.unwrap();
    assert_eq!(rows.get("a").map(String::as_str), Some("1"));
    assert_eq!(store.version_count(&dest).await, 1);
}

#[tokio::test]
async fn test_schema_alignment_is_additive() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    store.append_rows(&source, &[("a", "1")]).await.unwrap();
    let compactor = TableCompactor::new(&store, &config, "events");
    compactor.run_cycle().await.unwrap();

    // The source grows a column; the next cycle must add it to the
    // destination without touching existing columns.
    store
        .add_column(&source, "score", ColumnType::Int32)
        .await
        .unwrap();
    store.append_rows(&source, &[("b", "2")]).await.unwrap();
    compactor.run_cycle().await.unwrap();

    let dest = TableIdent::new("compacted", "events_cow");
    let dest_schema = store.schema_of(&dest, None).await.unwrap();
    assert_eq!(dest_schema.get("_olake_id"), Some(ColumnType::Utf8));
    assert_eq!(dest_schema.get("score"), Some(ColumnType::Int32));

    // The source widens the column; the destination follows.
    store
        .widen_column_type(&source, "score", ColumnType::Int64)
        .await
        .unwrap();
    store.append_rows(&source, &[("c", "3")]).await.unwrap();
    compactor.run_cycle().await.unwrap();

    let dest_schema = store.schema_of(&dest, None).await.unwrap();
    assert_eq!(dest_schema.get("score"), Some(ColumnType::Int64));
}

#[tokio::test]
async fn test_crash_between_stage_and_publish_recovers() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    store.append_rows(&source, &[("a", "1")]).await.unwrap();
    let compactor = TableCompactor::new(&store, &config, "events");
    compactor.run_cycle().await.unwrap();

    let dest = TableIdent::new("compacted", "events_cow");

    // A later run stages a merge and dies before publishing it.
    let c1 = store.append_rows(&source, &[("b", "2")]).await.unwrap();
    let t2 = store.truncate_table(&source).await.unwrap();
    store.stage_token(Some(t2)).await.unwrap();
    store
        .upsert_merge(&dest, &source, c1, "_olake_id")
        .await
        .unwrap();
    store.reset_session().await;

    // The staged merge never became visible.
    assert_eq!(store.rows(&dest).await.unwrap().len(), 1);

    // The next full cycle finds the old checkpoint and redoes the work.
    let outcome = compactor.run_cycle().await.unwrap();
    assert_eq!(outcome.boundaries_applied, 1);
    let rows = store.rows(&dest).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.get("b").map(String::as_str), Some("2"));

    let checkpoints = CheckpointStore::new(&store, &dest, 10);
    assert_eq!(checkpoints.last_published().await.unwrap(), Some(t2));
}

#[tokio::test]
async fn test_cycle_in_history_aborts_cleanly() {
    let store = InMemoryStore::new();
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.ensure_namespace("compacted").await.unwrap();

    let a1 = store.append_rows(&source, &[("a", "1")]).await.unwrap();
    let a2 = store.append_rows(&source, &[("b", "2")]).await.unwrap();
    // Corrupt the chain so the oldest version points forward again.
    store.set_parent(&source, a1, Some(a2)).await;

    let compactor = TableCompactor::new(&store, &config, "events");
    let err = compactor.run_cycle().await.unwrap_err();
    assert!(matches!(err, CompactionError::LineageCycle { .. }));
}

#[tokio::test]
async fn test_fleet_isolates_per_table_failures() {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();

    let events = seed_source(&store, "events").await;
    let users = seed_source(&store, "users").await;
    // A stray table that already carries the destination suffix must be
    // skipped entirely.
    seed_source(&store, "junk_cow").await;

    store.append_rows(&events, &[("a", "1")]).await.unwrap();
    store.append_rows(&users, &[("u", "1")]).await.unwrap();
    store.poison(&users).await;

    let report = run_fleet(store.clone(), &config).await.unwrap();

    assert_eq!(report.succeeded, vec!["events".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "users");
    assert!(report.failed[0].1.contains("injected failure"));
    assert!(!report.all_succeeded());

    // The healthy table still got compacted.
    let dest = TableIdent::new("compacted", "events_cow");
    assert_eq!(store.rows(&dest).await.unwrap().len(), 1);
    // And nothing was created for the stray destination-suffixed table.
    assert!(
        !store
            .exists(&TableIdent::new("compacted", "junk_cow_cow"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_fleet_ensures_destination_namespace() {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();
    let source = seed_source(&store, "events").await;
    store.append_rows(&source, &[("a", "1")]).await.unwrap();

    // No ensure_namespace call here: the fleet driver must do it.
    let report = run_fleet(store.clone(), &config).await.unwrap();
    assert!(report.all_succeeded());
    assert!(
        store
            .exists(&TableIdent::new("compacted", "events_cow"))
            .await
            .unwrap()
    );
}
