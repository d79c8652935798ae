//! Relationship graph for the cascade derived-column engine.
//!
//! Builds a static map of table-to-table foreign-key links from the models
//! map, finds join paths between tables, and renders those paths as SQL join
//! chains (forward `LEFT JOIN` chains for formula CTEs, inverted
//! `INNER JOIN` chains for record-locator queries).

pub mod error;
pub mod graph;
pub mod join;

pub use error::RelationError;
pub use graph::{RelationGraph, RelationKind, RelationLink};
