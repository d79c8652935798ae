//! Orchestrator error types.

use cascade_formula::FormulaError;
use cascade_relation::RelationError;
use cascade_storage::StorageError;

/// Errors surfaced by a refresh invocation or admin operation.
///
/// Every error aborts the invocation; nothing is retried and no writes
/// escape the caller's transaction.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Derived-to-derived dependencies do not form a DAG.
    #[error("cycle detected among derived columns: {remaining:?}")]
    CycleDetected {
        /// Qualified names that could not be scheduled.
        remaining: Vec<String>,
    },

    /// The table is absent from the static models map.
    #[error("model not found for table: {table}")]
    ModelNotFound {
        /// The unknown table name.
        table: String,
    },

    /// The caller's cancellation token fired between execution steps.
    #[error("refresh cancelled by caller")]
    Cancelled,

    /// Authoring-time formula failure.
    #[error(transparent)]
    Formula(#[from] FormulaError),

    /// No FK path between two tables.
    #[error(transparent)]
    Relation(#[from] RelationError),

    /// Underlying database failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RefreshError {
    pub fn model_not_found(table: impl Into<String>) -> Self {
        Self::ModelNotFound {
            table: table.into(),
        }
    }
}
