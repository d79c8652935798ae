//! The refresh engine: gate, expansion, ordering, execution.

use std::collections::BTreeSet;

use tracing::debug;

use cascade_core::action::Action;
use cascade_core::cancel::CancelToken;
use cascade_core::column::{ChangeSet, DerivedColumn};
use cascade_core::model::ModelsMap;
use cascade_core::value::RowValues;
use cascade_relation::{RelationError, RelationGraph, RelationLink};
use cascade_storage::RefreshTx;

use crate::error::RefreshError;
use crate::schedule::{self, RefreshStep};
use crate::state::RefreshPhase;

/// Report for one executed (or skipped) refresh step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Qualified `"table.column"` name.
    pub column: String,
    /// Number of target ids staged for the step.
    pub targets: usize,
    /// Rows the UPDATE actually touched (`IS DISTINCT FROM` guard applied).
    pub rows_updated: usize,
}

/// What a refresh invocation did, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub steps: Vec<StepOutcome>,
}

impl RefreshOutcome {
    /// Returns `true` when no derived column was scheduled at all.
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The refresh orchestrator.
///
/// Holds the immutable, process-initialised models map and relationship
/// graph; every invocation carries its own transaction handle and
/// cancellation token, so the engine is re-entrant across threads.
pub struct RefreshEngine {
    models: ModelsMap,
    graph: RelationGraph,
}

impl RefreshEngine {
    /// Builds the engine, deriving the relationship graph from the models.
    pub fn new(models: ModelsMap) -> Self {
        let graph = RelationGraph::build(&models);
        Self { models, graph }
    }

    pub fn models(&self) -> &ModelsMap {
        &self.models
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    /// Diagnostic: the hop chain between two tables.
    pub fn resolve_relation(&self, src: &str, dst: &str) -> Result<Vec<RelationLink>, RelationError> {
        self.graph.resolve(src, dst)
    }

    /// Refreshes every derived column made stale by a write on `table`.
    ///
    /// Runs inside the caller's transaction handle `tx`; on any error the
    /// caller's rollback reverts every staged change. `original_id`, when
    /// given, is a further id of `table` affected by the same write (e.g.
    /// the pre-change row of a re-parenting update) and joins the changed id
    /// set. For `Update`, `payload` carries the fields the caller actually
    /// set; other actions touch every column of the table's model.
    pub fn refresh(
        &self,
        tx: &dyn RefreshTx,
        table: &str,
        changed_ids: &[i64],
        action: Action,
        original_id: Option<i64>,
        payload: Option<&RowValues>,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome, RefreshError> {
        match self.run_refresh(tx, table, changed_ids, action, original_id, payload, cancel) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                debug!(phase = %RefreshPhase::Failed, table, error = %e, "refresh aborted");
                Err(e)
            }
        }
    }

    fn run_refresh(
        &self,
        tx: &dyn RefreshTx,
        table: &str,
        changed_ids: &[i64],
        action: Action,
        original_id: Option<i64>,
        payload: Option<&RowValues>,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome, RefreshError> {
        debug!(phase = %RefreshPhase::Init, table, %action, ids = changed_ids.len(), "refresh invoked");

        // 4.D.1 -- which columns of the trigger table may have changed.
        let changes = self.gather_changes(table, action, payload)?;
        debug!(phase = %RefreshPhase::Gated, table, touched = changes[table].len(), "change set gathered");

        // 4.D.2 -- transitive closure of dependant derived columns.
        let work_list = expand_dependants(tx, changes)?;
        debug!(phase = %RefreshPhase::Expanded, candidates = work_list.len(), "dependants expanded");
        if work_list.is_empty() {
            return Ok(RefreshOutcome::default());
        }

        // 4.D.3 / 4.D.4 -- topological order with per-level id resolution.
        let mut trigger: BTreeSet<i64> = changed_ids.iter().copied().collect();
        if let Some(original) = original_id {
            trigger.insert(original);
        }
        let trigger_ids: Vec<i64> = trigger.into_iter().collect();
        let steps = schedule::determine_refresh_order(tx, table, &trigger_ids, work_list)?;
        debug!(phase = %RefreshPhase::Ordered, steps = steps.len(), "refresh order determined");

        // 4.D.5 -- staged execution inside the caller's transaction.
        debug!(phase = %RefreshPhase::Executing, "executing refresh steps");
        let outcome = execute_steps(tx, &steps, cancel)?;
        debug!(phase = %RefreshPhase::Done, steps = outcome.steps.len(), "refresh complete");
        Ok(outcome)
    }

    /// Determines the columns potentially touched on the trigger table.
    fn gather_changes(
        &self,
        table: &str,
        action: Action,
        payload: Option<&RowValues>,
    ) -> Result<ChangeSet, RefreshError> {
        let descriptor = self
            .models
            .get(table)
            .ok_or_else(|| RefreshError::model_not_found(table))?;

        let columns: BTreeSet<String> = match action {
            Action::Create | Action::Delete | Action::Refresh => {
                descriptor.columns().map(str::to_string).collect()
            }
            Action::Update => payload
                .map(|fields| {
                    fields
                        .iter()
                        .filter(|(_, value)| !value.is_null())
                        .map(|(column, _)| column.clone())
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut changes = ChangeSet::new();
        changes.insert(table.to_string(), columns);
        Ok(changes)
    }
}

/// Repeatedly queries dependants: each newly discovered derived column
/// becomes a change entry for the next round, until a round discovers
/// nothing. Discovery order is kept; every column appears once.
fn expand_dependants(
    tx: &dyn RefreshTx,
    changes: ChangeSet,
) -> Result<Vec<DerivedColumn>, RefreshError> {
    let mut discovered: Vec<DerivedColumn> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut current = changes;

    loop {
        let found = tx.list_dependants(&current)?;
        let mut next = ChangeSet::new();

        for column in found {
            if seen.insert(column.qualified_name()) {
                next.entry(column.table_name.clone())
                    .or_default()
                    .insert(column.name.clone());
                discovered.push(column);
            }
        }

        if next.is_empty() {
            return Ok(discovered);
        }
        current = next;
    }
}

/// Runs the ordered steps: truncate staging, load the step's ids, execute
/// the compiled statement. Steps with no targets are skipped. Cancellation
/// is honoured at step boundaries.
fn execute_steps(
    tx: &dyn RefreshTx,
    steps: &[RefreshStep],
    cancel: &CancelToken,
) -> Result<RefreshOutcome, RefreshError> {
    tx.create_staging_table()?;

    let mut outcome = RefreshOutcome::default();
    for step in steps {
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let name = step.column.qualified_name();
        if step.ids.is_empty() {
            debug!(column = %name, "no target ids, skipping");
            outcome.steps.push(StepOutcome {
                column: name,
                targets: 0,
                rows_updated: 0,
            });
            continue;
        }

        tx.truncate_staging()?;
        tx.load_staging(&step.ids)?;
        let rows_updated = tx.execute_refresh(&step.column)?;

        outcome.steps.push(StepOutcome {
            column: name,
            targets: step.ids.len(),
            rows_updated,
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use cascade_core::model::TableDescriptor;
    use cascade_core::value::SqlValue;
    use pretty_assertions::assert_eq;

    use super::*;

    fn engine() -> RefreshEngine {
        RefreshEngine::new(
            ModelsMap::new()
                .register(
                    TableDescriptor::new("invoice")
                        .field("contract_id")
                        .field("total_amount")
                        .field("description"),
                )
                .register(TableDescriptor::new("contract").field("company_id")),
        )
    }

    #[test]
    fn gate_create_touches_every_column() {
        let changes = engine()
            .gather_changes("invoice", Action::Create, None)
            .unwrap();
        let touched = &changes["invoice"];
        assert!(touched.contains("id"));
        assert!(touched.contains("is_deleted"));
        assert!(touched.contains("total_amount"));
        assert!(touched.contains("description"));
    }

    #[test]
    fn gate_update_uses_only_set_payload_fields() {
        let mut payload = RowValues::new();
        payload.insert("description".to_string(), SqlValue::Text("monthly".into()));
        payload.insert("total_amount".to_string(), SqlValue::Null);

        let changes = engine()
            .gather_changes("invoice", Action::Update, Some(&payload))
            .unwrap();
        let touched = &changes["invoice"];
        assert_eq!(touched.len(), 1);
        assert!(touched.contains("description"));
    }

    #[test]
    fn gate_update_without_payload_touches_nothing() {
        let changes = engine()
            .gather_changes("invoice", Action::Update, None)
            .unwrap();
        assert!(changes["invoice"].is_empty());
    }

    #[test]
    fn gate_rejects_unknown_table() {
        let err = engine()
            .gather_changes("warehouse", Action::Create, None)
            .unwrap_err();
        assert!(matches!(err, RefreshError::ModelNotFound { .. }));
    }

    #[test]
    fn resolve_relation_is_exposed_for_diagnostics() {
        let links = engine().resolve_relation("contract", "invoice").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].table, "invoice");
    }
}
