//! In-memory table store.
//!
//! Models the observable contract of a catalog-backed table format:
//! parent-linked version history with engine-style statistics summaries,
//! session-scoped staging where staged writes become visible only at
//! publish, and idempotent publication. This is the test collaborator and
//! a protocol simulator, not a storage engine; rows are a flat
//! `match key -> payload` map and schema history is not versioned.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use tokio::sync::Mutex;

use crate::error::{ExecutionSnafu, InvalidTypeChangeSnafu, StoreError, TableNotFoundSnafu};
use crate::schema::{ColumnType, TableSchema};
use crate::snapshot::{Operation, Statistics, Version, VersionId};
use crate::store::{PublishOutcome, TableIdent, TableStore};

/// A write staged under a token, invisible until published.
struct PendingCommit {
    token: VersionId,
    rows: BTreeMap<String, String>,
}

#[derive(Default)]
struct TableState {
    location: Option<String>,
    schema: TableSchema,
    /// Published versions, oldest first.
    versions: Vec<Version>,
    /// Row state as of each published version.
    states: HashMap<VersionId, BTreeMap<String, String>>,
    pending: Option<PendingCommit>,
}

impl TableState {
    fn head_rows(&self) -> BTreeMap<String, String> {
        self.versions
            .last()
            .and_then(|v| self.states.get(&v.id))
            .cloned()
            .unwrap_or_default()
    }

    fn totals(&self) -> (u64, u64) {
        self.versions
            .last()
            .map(|v| {
                (
                    v.statistics.total_data_files().unwrap_or(0),
                    v.statistics.total_delete_files().unwrap_or(0),
                )
            })
            .unwrap_or((0, 0))
    }

    fn push(
        &mut self,
        id: VersionId,
        operation: Operation,
        summary: HashMap<String, String>,
        publish_token: Option<String>,
        rows: BTreeMap<String, String>,
    ) {
        let parent_id = self.versions.last().map(|v| v.id);
        self.versions.push(Version {
            id,
            parent_id,
            committed_at: Utc::now(),
            operation,
            statistics: Statistics::from_summary(&summary),
            publish_token,
        });
        self.states.insert(id, rows);
    }
}

#[derive(Default)]
struct StoreInner {
    namespaces: HashSet<String>,
    tables: HashMap<String, TableState>,
    /// Session-scoped staging token.
    staged_token: Option<VersionId>,
    next_version_id: i64,
    /// When false, truncate summaries omit the removed-file counts, the
    /// way some engines do.
    report_removed_statistics: bool,
    /// Tables whose mutating operations fail, for fault injection.
    poisoned: HashSet<String>,
}

impl StoreInner {
    fn alloc_id(&mut self) -> VersionId {
        self.next_version_id += 1;
        VersionId::new(self.next_version_id)
    }

    fn table(&self, fqn: &str) -> Result<&TableState, StoreError> {
        self.tables.get(fqn).context(TableNotFoundSnafu { table: fqn })
    }

    fn table_mut(&mut self, fqn: &str) -> Result<&mut TableState, StoreError> {
        self.tables
            .get_mut(fqn)
            .context(TableNotFoundSnafu { table: fqn })
    }

    fn check_poisoned(&self, fqn: &str, operation: &'static str) -> Result<(), StoreError> {
        ensure!(
            !self.poisoned.contains(fqn),
            ExecutionSnafu {
                operation,
                table: fqn,
                message: "injected failure",
            }
        );
        Ok(())
    }
}

fn fqn(table: &TableIdent) -> String {
    table.to_string()
}

fn summary(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// In-memory [`TableStore`] implementation.
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                report_removed_statistics: true,
                ..StoreInner::default()
            }),
        }
    }

    /// Register a table with the given schema and no versions.
    pub async fn create_table(&self, table: &TableIdent, schema: TableSchema) {
        let mut inner = self.inner.lock().await;
        inner.namespaces.insert(table.namespace.clone());
        inner.tables.insert(
            fqn(table),
            TableState {
                schema,
                ..TableState::default()
            },
        );
    }

    /// Upsert rows keyed by the match column, committing an append version.
    pub async fn append_rows(
        &self,
        table: &TableIdent,
        rows: &[(&str, &str)],
    ) -> Result<VersionId, StoreError> {
        let mut inner = self.inner.lock().await;
        let fqn = fqn(table);
        let state = inner.table(&fqn)?;
        let mut next = state.head_rows();
        for (key, value) in rows {
            next.insert(key.to_string(), value.to_string());
        }
        let (total_data, total_delete) = state.totals();
        let summary = summary(&[
            ("added-data-files", "1".to_string()),
            ("total-data-files", (total_data + 1).to_string()),
            ("total-delete-files", total_delete.to_string()),
        ]);
        let id = inner.alloc_id();
        inner
            .table_mut(&fqn)?
            .push(id, Operation::Append, summary, None, next);
        Ok(id)
    }

    /// Delete rows by key with a positional-delete style version.
    pub async fn delete_rows(
        &self,
        table: &TableIdent,
        keys: &[&str],
    ) -> Result<VersionId, StoreError> {
        let mut inner = self.inner.lock().await;
        let fqn = fqn(table);
        let state = inner.table(&fqn)?;
        let mut next = state.head_rows();
        for key in keys {
            next.remove(*key);
        }
        let (total_data, total_delete) = state.totals();
        let summary = summary(&[
            ("added-data-files", "0".to_string()),
            ("added-delete-files", "1".to_string()),
            ("deleted-data-files", "0".to_string()),
            ("total-data-files", total_data.to_string()),
            ("total-delete-files", (total_delete + 1).to_string()),
        ]);
        let id = inner.alloc_id();
        inner
            .table_mut(&fqn)?
            .push(id, Operation::Delete, summary, None, next);
        Ok(id)
    }

    /// Truncate, returning the id of the truncate version.
    pub async fn truncate_table(&self, table: &TableIdent) -> Result<VersionId, StoreError> {
        let mut inner = self.inner.lock().await;
        let fqn = fqn(table);
        inner.check_poisoned(&fqn, "truncate")?;
        let state = inner.table(&fqn)?;
        let (total_data, total_delete) = state.totals();
        let mut pairs = vec![
            ("added-data-files", "0".to_string()),
            ("added-delete-files", "0".to_string()),
            ("total-data-files", "0".to_string()),
            ("total-delete-files", "0".to_string()),
        ];
        if inner.report_removed_statistics {
            pairs.push(("deleted-data-files", total_data.to_string()));
            pairs.push(("deleted-delete-files", total_delete.to_string()));
        }
        let summary = summary(&pairs);
        let id = inner.alloc_id();
        inner
            .table_mut(&fqn)?
            .push(id, Operation::Delete, summary, None, BTreeMap::new());
        Ok(id)
    }

    /// Current published row state, or `None` for a missing table.
    pub async fn rows(&self, table: &TableIdent) -> Option<BTreeMap<String, String>> {
        let inner = self.inner.lock().await;
        inner.tables.get(&fqn(table)).map(TableState::head_rows)
    }

    /// Storage location recorded for the table, when one was set.
    pub async fn location(&self, table: &TableIdent) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&fqn(table))
            .and_then(|t| t.location.clone())
    }

    /// Number of published versions; 0 for a missing table.
    pub async fn version_count(&self, table: &TableIdent) -> usize {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&fqn(table))
            .map(|t| t.versions.len())
            .unwrap_or(0)
    }

    /// Simulate a process restart: the session staging token and all
    /// unpublished pending commits are lost, published state survives.
    pub async fn reset_session(&self) {
        let mut inner = self.inner.lock().await;
        inner.staged_token = None;
        for state in inner.tables.values_mut() {
            state.pending = None;
        }
    }

    /// Suppress or restore removed-file counts in truncate summaries.
    pub async fn set_report_removed_statistics(&self, report: bool) {
        self.inner.lock().await.report_removed_statistics = report;
    }

    /// Make every mutating operation on the table fail.
    pub async fn poison(&self, table: &TableIdent) {
        self.inner.lock().await.poisoned.insert(fqn(table));
    }

    /// Undo [`poison`](Self::poison).
    pub async fn unpoison(&self, table: &TableIdent) {
        self.inner.lock().await.poisoned.remove(&fqn(table));
    }

    /// Rewrite a version's parent link. Test-only corruption knob.
    pub async fn set_parent(
        &self,
        table: &TableIdent,
        version: VersionId,
        parent: Option<VersionId>,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.tables.get_mut(&fqn(table)) {
            if let Some(v) = state.versions.iter_mut().find(|v| v.id == version) {
                v.parent_id = parent;
            }
        }
    }

    /// Overwrite the token recorded on a version. Test-only knob for
    /// exercising unparseable-token recovery.
    pub async fn set_publish_token(
        &self,
        table: &TableIdent,
        version: VersionId,
        token: Option<&str>,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.tables.get_mut(&fqn(table)) {
            if let Some(v) = state.versions.iter_mut().find(|v| v.id == version) {
                v.publish_token = token.map(str::to_string);
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableStore for InMemoryStore {
    async fn exists(&self, table: &TableIdent) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.contains_key(&fqn(table)))
    }

    async fn recent_versions(
        &self,
        table: &TableIdent,
        limit: usize,
    ) -> Result<Vec<Version>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(state) = inner.tables.get(&fqn(table)) else {
            return Ok(Vec::new());
        };
        Ok(state.versions.iter().rev().take(limit).cloned().collect())
    }

    async fn version_by_id(
        &self,
        table: &TableIdent,
        id: VersionId,
    ) -> Result<Option<Version>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(state) = inner.tables.get(&fqn(table)) else {
            return Ok(None);
        };
        Ok(state.versions.iter().find(|v| v.id == id).cloned())
    }

    async fn truncate(&self, table: &TableIdent) -> Result<(), StoreError> {
        self.truncate_table(table).await.map(|_| ())
    }

    async fn create_as_copy(
        &self,
        dest: &TableIdent,
        dest_location: &str,
        source: &TableIdent,
        source_version: VersionId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let dest_fqn = fqn(dest);
        inner.check_poisoned(&dest_fqn, "create")?;
        if inner.tables.contains_key(&dest_fqn) {
            // Tolerated: a retried applier call may have created it already.
            return Ok(());
        }
        ensure!(
            inner.namespaces.contains(&dest.namespace),
            ExecutionSnafu {
                operation: "create",
                table: dest_fqn,
                message: format!("namespace {} does not exist", dest.namespace),
            }
        );
        let source_fqn = fqn(source);
        let source_state = inner.table(&source_fqn)?;
        let rows = source_state
            .states
            .get(&source_version)
            .cloned()
            .with_context(|| ExecutionSnafu {
                operation: "create",
                table: source_fqn.clone(),
                message: format!("unknown source version {source_version}"),
            })?;
        let schema = source_state.schema.clone();
        let token = inner.staged_token.map(|t| t.to_string());
        let files: u64 = if rows.is_empty() { 0 } else { 1 };
        let summary = summary(&[
            ("added-data-files", files.to_string()),
            ("total-data-files", files.to_string()),
            ("total-delete-files", "0".to_string()),
        ]);
        let id = inner.alloc_id();
        inner.tables.insert(
            dest_fqn.clone(),
            TableState {
                location: Some(dest_location.to_string()),
                schema,
                ..TableState::default()
            },
        );
        inner
            .table_mut(&dest_fqn)?
            .push(id, Operation::Append, summary, token, rows);
        Ok(())
    }

    async fn stage_token(&self, token: Option<VersionId>) -> Result<(), StoreError> {
        self.inner.lock().await.staged_token = token;
        Ok(())
    }

    async fn publish_token(
        &self,
        dest: &TableIdent,
        token: VersionId,
    ) -> Result<PublishOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let dest_fqn = fqn(dest);
        let token_str = token.to_string();
        let pending = {
            let state = inner.table_mut(&dest_fqn)?;
            if state
                .versions
                .iter()
                .any(|v| v.publish_token.as_deref() == Some(token_str.as_str()))
            {
                return Ok(PublishOutcome::AlreadyPublished);
            }
            match state.pending.take() {
                Some(pending) if pending.token == token => pending,
                Some(pending) => {
                    let message = format!(
                        "staged token {} does not match publish token {token}",
                        pending.token
                    );
                    state.pending = Some(pending);
                    return ExecutionSnafu {
                        operation: "publish",
                        table: dest_fqn,
                        message,
                    }
                    .fail();
                }
                None => {
                    return ExecutionSnafu {
                        operation: "publish",
                        table: dest_fqn,
                        message: format!("no staged changes for token {token}"),
                    }
                    .fail();
                }
            }
        };
        let id = inner.alloc_id();
        let state = inner.table_mut(&dest_fqn)?;
        let (total_data, _) = state.totals();
        let summary = summary(&[
            ("added-data-files", "1".to_string()),
            ("total-data-files", (total_data + 1).to_string()),
            ("total-delete-files", "0".to_string()),
        ]);
        state.push(id, Operation::Overwrite, summary, Some(token_str), pending.rows);
        Ok(PublishOutcome::Published)
    }

    async fn schema_of(
        &self,
        table: &TableIdent,
        _at: Option<VersionId>,
    ) -> Result<TableSchema, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.table(&fqn(table))?.schema.clone())
    }

    async fn add_column(
        &self,
        table: &TableIdent,
        name: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let fqn = fqn(table);
        let state = inner.table_mut(&fqn)?;
        ensure!(
            !state.schema.contains(name),
            ExecutionSnafu {
                operation: "add column",
                table: fqn,
                message: format!("column {name} already exists"),
            }
        );
        state.schema.insert(name, column_type);
        Ok(())
    }

    async fn widen_column_type(
        &self,
        table: &TableIdent,
        name: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let fqn = fqn(table);
        let state = inner.table_mut(&fqn)?;
        let current = state.schema.get(name).with_context(|| ExecutionSnafu {
            operation: "widen column",
            table: fqn.clone(),
            message: format!("no such column {name}"),
        })?;
        ensure!(
            current.can_widen_to(column_type),
            InvalidTypeChangeSnafu {
                table: fqn,
                column: name,
                from: current,
                to: column_type,
            }
        );
        state.schema.insert(name, column_type);
        Ok(())
    }

    async fn upsert_merge(
        &self,
        dest: &TableIdent,
        source: &TableIdent,
        source_version: VersionId,
        match_key: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let dest_fqn = fqn(dest);
        inner.check_poisoned(&dest_fqn, "merge")?;
        let source_fqn = fqn(source);
        let source_rows = inner
            .table(&source_fqn)?
            .states
            .get(&source_version)
            .cloned()
            .with_context(|| ExecutionSnafu {
                operation: "merge",
                table: source_fqn.clone(),
                message: format!("unknown source version {source_version}"),
            })?;
        let staged = inner.staged_token;
        let state = inner.table_mut(&dest_fqn)?;
        ensure!(
            state.schema.contains(match_key),
            ExecutionSnafu {
                operation: "merge",
                table: dest_fqn,
                message: format!("match column {match_key} missing from destination"),
            }
        );
        let mut merged = state.head_rows();
        merged.extend(source_rows);
        match staged {
            Some(token) => {
                state.pending = Some(PendingCommit {
                    token,
                    rows: merged,
                });
            }
            None => {
                let (total_data, _) = state.totals();
                let summary = summary(&[
                    ("added-data-files", "1".to_string()),
                    ("total-data-files", (total_data + 1).to_string()),
                    ("total-delete-files", "0".to_string()),
                ]);
                let id = inner.alloc_id();
                inner
                    .table_mut(&dest_fqn)?
                    .push(id, Operation::Overwrite, summary, None, merged);
            }
        }
        Ok(())
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner
            .tables
            .keys()
            .filter_map(|fqn| {
                fqn.split_once('.')
                    .filter(|(ns, _)| *ns == namespace)
                    .map(|(_, name)| name.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .namespaces
            .insert(namespace.to_string());
        Ok(())
    }
}
