//! The derived-column model persisted in `dynamic_column`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Value type of a derived column's physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Float,
    Bool,
    Int,
    Timestamp,
}

impl ValueType {
    /// Returns the string representation stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Timestamp => "timestamp",
        }
    }

    /// Parses the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "float" => Some(Self::Float),
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "timestamp" => Some(Self::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dependency entry: which columns of a table the derived column reads,
/// and the SQL that maps changed rows of that table back to root-table ids.
///
/// The entry for the root table itself has an empty selector -- the changed
/// root ids are already the target ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDependency {
    /// Physical column names read from the dependency table.
    #[serde(default)]
    pub columns: Vec<String>,

    /// SQL returning root-table ids for changed rows of this table. Binds
    /// the changed ids via the `{<table>.ids}` placeholder.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub record_ids_selector: String,
}

/// Table name to dependency entry, the JSON shape of the `dependencies`
/// column. A `BTreeMap` keeps iteration deterministic.
pub type DependencyMap = BTreeMap<String, ColumnDependency>;

/// Tables touched by a write, with the columns touched on each. This is the
/// change set fed to impact analysis.
pub type ChangeSet = BTreeMap<String, BTreeSet<String>>;

/// A derived column: a physical column whose value is recomputed from a
/// formula over the same row and related rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedColumn {
    #[serde(default)]
    pub id: i64,

    /// Physical column name holding the computed value.
    pub name: String,

    /// Root table owning the physical column.
    pub table_name: String,

    /// User-authored formula template.
    pub formula: String,

    #[serde(default)]
    pub default_value: String,

    /// Value type (serialised as "type").
    #[serde(rename = "type")]
    pub value_type: ValueType,

    /// User-declared aggregate variables, one `var name = expr` per line.
    #[serde(default)]
    pub variables: String,

    /// Compiler output: the full CTE-chain UPDATE statement. Stored so
    /// refresh paths never recompile.
    #[serde(default)]
    pub compiled_sql: String,

    /// Per-table dependency entries.
    #[serde(default)]
    pub dependencies: DependencyMap,
}

impl DerivedColumn {
    /// The `"table.column"` key used for ordering and diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    /// Flattens the dependency map into `"table.column"` keys.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .flat_map(|(table, dep)| {
                dep.columns.iter().map(move |col| format!("{table}.{col}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_column() -> DerivedColumn {
        let mut dependencies = DependencyMap::new();
        dependencies.insert(
            "invoice".to_string(),
            ColumnDependency {
                columns: vec!["total_amount".to_string()],
                record_ids_selector: String::new(),
            },
        );
        dependencies.insert(
            "payment".to_string(),
            ColumnDependency {
                columns: vec!["amount".to_string(), "invoice_id".to_string()],
                record_ids_selector:
                    "SELECT invoice.id FROM payment JOIN invoice ON payment.invoice_id = invoice.id \
                     WHERE payment.id IN ({payment.ids}) GROUP BY invoice.id"
                        .to_string(),
            },
        );
        DerivedColumn {
            id: 1,
            name: "pending_amount".to_string(),
            table_name: "invoice".to_string(),
            formula: "{{invoice}}.total_amount".to_string(),
            default_value: String::new(),
            value_type: ValueType::Float,
            variables: String::new(),
            compiled_sql: String::new(),
            dependencies,
        }
    }

    #[test]
    fn value_type_round_trips() {
        for vt in [
            ValueType::String,
            ValueType::Float,
            ValueType::Bool,
            ValueType::Int,
            ValueType::Timestamp,
        ] {
            assert_eq!(ValueType::parse(vt.as_str()), Some(vt));
        }
        assert_eq!(ValueType::parse("decimal"), None);
    }

    #[test]
    fn dependencies_json_shape() {
        let col = sample_column();
        let json = serde_json::to_value(&col.dependencies).unwrap();

        // Root entry has no selector key at all.
        assert_eq!(json["invoice"]["columns"], serde_json::json!(["total_amount"]));
        assert!(json["invoice"].get("record_ids_selector").is_none());

        // Non-root entry carries its selector.
        assert!(
            json["payment"]["record_ids_selector"]
                .as_str()
                .unwrap()
                .starts_with("SELECT invoice.id")
        );
    }

    #[test]
    fn value_type_serialised_as_type() {
        let col = sample_column();
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "float");
    }

    #[test]
    fn qualified_and_dependency_names() {
        let col = sample_column();
        assert_eq!(col.qualified_name(), "invoice.pending_amount");

        let mut deps = col.dependency_names();
        deps.sort();
        assert_eq!(
            deps,
            vec!["invoice.total_amount", "payment.amount", "payment.invoice_id"]
        );
    }
}
