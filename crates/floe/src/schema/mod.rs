//! Schema alignment between source and destination tables.
//!
//! Before every merge the destination's column set is reconciled with the
//! source's: columns the destination lacks are added, and columns whose
//! type has widened at the source are widened at the destination. Nothing
//! is ever dropped or renamed.

use std::fmt;

use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use tracing::info;

use crate::error::StoreError;
use crate::store::{TableIdent, TableStore};

/// Column types understood by the aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Date,
    Timestamp,
    Utf8,
    Binary,
}

impl ColumnType {
    /// Whether changing a column from `self` to `to` is a supported
    /// widening. Strict: a type never widens to itself.
    ///
    /// Allowed: integer widening along Int8 -> Int16 -> Int32 -> Int64,
    /// and Float32 -> Float64.
    pub fn can_widen_to(self, to: ColumnType) -> bool {
        use ColumnType::*;
        matches!(
            (self, to),
            (Int8, Int16 | Int32 | Int64)
                | (Int16, Int32 | Int64)
                | (Int32, Int64)
                | (Float32, Float64)
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Int8 => "int8",
            ColumnType::Int16 => "int16",
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::Float32 => "float32",
            ColumnType::Float64 => "float64",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Utf8 => "string",
            ColumnType::Binary => "binary",
        };
        write!(f, "{name}")
    }
}

/// An ordered column name to type mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: IndexMap<String, ColumnType>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type of the named column, if present.
    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Insert or replace a column.
    pub fn insert(&mut self, name: impl Into<String>, column_type: ColumnType) {
        self.columns.insert(name.into(), column_type);
    }

    /// Iterate columns in definition order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, ColumnType)> for TableSchema {
    fn from_iter<I: IntoIterator<Item = (String, ColumnType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// A single DDL request produced by alignment planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignAction {
    /// Add a column the destination lacks, with the source's type.
    AddColumn {
        name: String,
        column_type: ColumnType,
    },
    /// Widen a column present on both sides with differing types.
    WidenColumn {
        name: String,
        from: ColumnType,
        to: ColumnType,
    },
}

/// Plan the DDL needed to make `dest` able to receive every `source`
/// column by name. Additive only: destination-only columns are left alone.
pub fn plan_alignment(source: &TableSchema, dest: &TableSchema) -> Vec<AlignAction> {
    let mut actions = Vec::new();
    for (name, source_type) in source.columns() {
        match dest.get(name) {
            None => actions.push(AlignAction::AddColumn {
                name: name.to_string(),
                column_type: source_type,
            }),
            Some(dest_type) if dest_type != source_type => {
                actions.push(AlignAction::WidenColumn {
                    name: name.to_string(),
                    from: dest_type,
                    to: source_type,
                });
            }
            Some(_) => {}
        }
    }
    actions
}

/// Issue the planned DDL against the destination table.
pub async fn apply_alignment(
    store: &dyn TableStore,
    dest: &TableIdent,
    actions: &[AlignAction],
) -> Result<(), StoreError> {
    for action in actions {
        match action {
            AlignAction::AddColumn { name, column_type } => {
                info!(
                    target = %dest,
                    column = %name,
                    column_type = %column_type,
                    "Adding column to destination table"
                );
                store.add_column(dest, name, *column_type).await?;
            }
            AlignAction::WidenColumn { name, from, to } => {
                info!(
                    target = %dest,
                    column = %name,
                    from = %from,
                    to = %to,
                    "Widening column type on destination table"
                );
                store.widen_column_type(dest, name, *to).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(columns: &[(&str, ColumnType)]) -> TableSchema {
        columns
            .iter()
            .map(|(name, ty)| (name.to_string(), *ty))
            .collect()
    }

    #[test]
    fn test_plan_identical_schemas_is_empty() {
        let s = schema(&[("a", ColumnType::Int32), ("b", ColumnType::Utf8)]);
        assert!(plan_alignment(&s, &s).is_empty());
    }

    #[test]
    fn test_plan_adds_missing_column() {
        let source = schema(&[("a", ColumnType::Int32), ("b", ColumnType::Utf8)]);
        let dest = schema(&[("a", ColumnType::Int32)]);

        let actions = plan_alignment(&source, &dest);
        assert_eq!(
            actions,
            vec![AlignAction::AddColumn {
                name: "b".to_string(),
                column_type: ColumnType::Utf8,
            }]
        );
    }

    #[test]
    fn test_plan_never_drops_destination_columns() {
        let source = schema(&[("a", ColumnType::Int32)]);
        let dest = schema(&[("a", ColumnType::Int32), ("extra", ColumnType::Utf8)]);

        assert!(plan_alignment(&source, &dest).is_empty());
    }

    #[test]
    fn test_plan_widens_differing_type() {
        let source = schema(&[("a", ColumnType::Int64)]);
        let dest = schema(&[("a", ColumnType::Int32)]);

        let actions = plan_alignment(&source, &dest);
        assert_eq!(
            actions,
            vec![AlignAction::WidenColumn {
                name: "a".to_string(),
                from: ColumnType::Int32,
                to: ColumnType::Int64,
            }]
        );
    }

    #[test]
    fn test_integer_widening_chain() {
        use ColumnType::*;
        assert!(Int8.can_widen_to(Int16));
        assert!(Int8.can_widen_to(Int64));
        assert!(Int16.can_widen_to(Int32));
        assert!(Int32.can_widen_to(Int64));
        assert!(Float32.can_widen_to(Float64));

        assert!(!Int64.can_widen_to(Int32));
        assert!(!Float64.can_widen_to(Float32));
        assert!(!Int32.can_widen_to(Int32));
        assert!(!Int64.can_widen_to(Utf8));
    }

    #[test]
    fn test_schema_preserves_column_order() {
        let s = schema(&[
            ("z", ColumnType::Utf8),
            ("a", ColumnType::Int32),
            ("m", ColumnType::Boolean),
        ]);
        let names: Vec<_> = s.columns().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
