//! Relationship resolution errors.

/// Errors raised while resolving table relationships.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelationError {
    /// No foreign-key path exists between the two tables.
    #[error("no relation between {src} and {dst}")]
    NoRelation {
        /// Table the search started from.
        src: String,
        /// Table the search could not reach.
        dst: String,
    },
}

impl RelationError {
    pub fn no_relation(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self::NoRelation {
            src: src.into(),
            dst: dst.into(),
        }
    }
}
