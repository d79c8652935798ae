//! The relationship graph: FK edges between tables and path resolution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use cascade_core::model::ModelsMap;

use crate::error::RelationError;

/// Direction of a foreign-key edge between two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The far table holds a `<near>_id` column (near 1 -> N far).
    OneToMany,
    /// The near table holds a `<far>_id` column (near N -> 1 far).
    ManyToOne,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToMany => "one_to_many",
            Self::ManyToOne => "many_to_one",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hop of a resolved path: the table reached and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationLink {
    pub table: String,
    pub kind: RelationKind,
}

impl RelationLink {
    pub fn new(table: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            table: table.into(),
            kind,
        }
    }
}

/// Static map of table-to-table FK links, derived once from the models map.
///
/// For every ordered pair `(x, y)`, `x != y`: if `y` has a column literally
/// named `<x>_id` the graph records `x --one_to_many--> y`; if `x` has a
/// column named `<y>_id` it records `x --many_to_one--> y`. Neighbour lists
/// stay sorted so resolution is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationGraph {
    one_to_many: BTreeMap<String, Vec<String>>,
    many_to_one: BTreeMap<String, Vec<String>>,
}

impl RelationGraph {
    /// Builds the graph from the static models map.
    pub fn build(models: &ModelsMap) -> Self {
        let mut graph = Self::default();

        for table in models.tables() {
            for related in models.tables() {
                if table.name() == related.name() {
                    continue;
                }

                let fk_to_table = format!("{}_id", table.name());
                if related.has_column(&fk_to_table) {
                    graph
                        .one_to_many
                        .entry(table.name().to_string())
                        .or_default()
                        .push(related.name().to_string());
                }

                let fk_to_related = format!("{}_id", related.name());
                if table.has_column(&fk_to_related) {
                    graph
                        .many_to_one
                        .entry(table.name().to_string())
                        .or_default()
                        .push(related.name().to_string());
                }
            }
        }

        graph
    }

    /// Neighbours of `table` along edges of the given kind, sorted.
    pub fn neighbours(&self, table: &str, kind: RelationKind) -> &[String] {
        let map = match kind {
            RelationKind::OneToMany => &self.one_to_many,
            RelationKind::ManyToOne => &self.many_to_one,
        };
        map.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Finds an ordered hop list from `src` to `dst`.
    ///
    /// Depth-first with a visited set; `one_to_many` edges are explored
    /// before `many_to_one`, and ties break on the first (alphabetical)
    /// match. The terminating hop is `dst`.
    pub fn resolve(&self, src: &str, dst: &str) -> Result<Vec<RelationLink>, RelationError> {
        if src == dst {
            return Ok(Vec::new());
        }

        let mut visited = HashSet::new();
        visited.insert(src.to_string());
        let mut path = Vec::new();

        if self.walk(src, dst, &mut visited, &mut path) {
            Ok(path)
        } else {
            Err(RelationError::no_relation(src, dst))
        }
    }

    fn walk(
        &self,
        current: &str,
        dst: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<RelationLink>,
    ) -> bool {
        for kind in [RelationKind::OneToMany, RelationKind::ManyToOne] {
            for next in self.neighbours(current, kind) {
                if visited.contains(next) {
                    continue;
                }
                visited.insert(next.clone());
                path.push(RelationLink::new(next.clone(), kind));

                if next == dst || self.walk(next, dst, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use cascade_core::model::TableDescriptor;
    use pretty_assertions::assert_eq;

    use super::*;

    /// company 1-M contract 1-M invoice 1-M payment, company 1-M approval.
    fn sample_models() -> ModelsMap {
        ModelsMap::new()
            .register(TableDescriptor::new("company").field("name").field("is_active"))
            .register(
                TableDescriptor::new("contract")
                    .field("company_id")
                    .field("start_date")
                    .field("end_date"),
            )
            .register(
                TableDescriptor::new("invoice")
                    .field("contract_id")
                    .field("total_amount"),
            )
            .register(TableDescriptor::new("payment").field("invoice_id").field("amount"))
            .register(TableDescriptor::new("approval").field("company_id").field("status"))
            .register(TableDescriptor::new("employee").field("name"))
    }

    #[test]
    fn build_records_both_directions() {
        let graph = RelationGraph::build(&sample_models());

        assert_eq!(
            graph.neighbours("company", RelationKind::OneToMany),
            &["approval".to_string(), "contract".to_string()]
        );
        assert_eq!(
            graph.neighbours("invoice", RelationKind::ManyToOne),
            &["contract".to_string()]
        );
        assert!(graph.neighbours("employee", RelationKind::OneToMany).is_empty());
    }

    #[test]
    fn resolve_direct_hop() {
        let graph = RelationGraph::build(&sample_models());
        let path = graph.resolve("invoice", "payment").unwrap();
        assert_eq!(path, vec![RelationLink::new("payment", RelationKind::OneToMany)]);
    }

    #[test]
    fn resolve_chains_through_intermediates() {
        let graph = RelationGraph::build(&sample_models());
        let path = graph.resolve("company", "invoice").unwrap();
        assert_eq!(
            path,
            vec![
                RelationLink::new("contract", RelationKind::OneToMany),
                RelationLink::new("invoice", RelationKind::OneToMany),
            ]
        );
    }

    #[test]
    fn resolve_walks_many_to_one_upwards() {
        let graph = RelationGraph::build(&sample_models());
        let path = graph.resolve("payment", "company").unwrap();
        assert_eq!(
            path,
            vec![
                RelationLink::new("invoice", RelationKind::ManyToOne),
                RelationLink::new("contract", RelationKind::ManyToOne),
                RelationLink::new("company", RelationKind::ManyToOne),
            ]
        );
    }

    #[test]
    fn resolve_same_table_is_empty() {
        let graph = RelationGraph::build(&sample_models());
        assert_eq!(graph.resolve("invoice", "invoice").unwrap(), Vec::new());
    }

    #[test]
    fn resolve_unrelated_fails() {
        let graph = RelationGraph::build(&sample_models());
        let err = graph.resolve("invoice", "employee").unwrap_err();
        assert_eq!(err, RelationError::no_relation("invoice", "employee"));
    }
}
