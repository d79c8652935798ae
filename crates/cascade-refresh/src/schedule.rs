//! Topological ordering of the work list with per-level id resolution.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use cascade_core::column::DerivedColumn;
use cascade_formula::subst::SubstitutionContext;
use cascade_storage::RefreshTx;

use crate::error::RefreshError;

/// One scheduled refresh step: the column and its resolved target ids.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshStep {
    pub column: DerivedColumn,
    pub ids: Vec<i64>,
}

/// Orders the work list so every derived-to-derived dependency is refreshed
/// before its dependants, resolving each step's target id set as it is
/// emitted.
///
/// Three cases per candidate:
/// 1. no dependency on any work-list column: target ids come from the
///    triggering write's ids (through the trigger table's selector, which is
///    empty for the trigger table itself);
/// 2. every work-list dependency already emitted: target ids are the union
///    of each dependency's resolved ids pushed through this column's
///    per-table selectors;
/// 3. otherwise the candidate is requeued for a later pass.
///
/// A full pass without progress means the metadata is cyclic.
pub(crate) fn determine_refresh_order(
    tx: &dyn RefreshTx,
    trigger_table: &str,
    trigger_ids: &[i64],
    work_list: Vec<DerivedColumn>,
) -> Result<Vec<RefreshStep>, RefreshError> {
    let refresh_names: BTreeSet<String> =
        work_list.iter().map(DerivedColumn::qualified_name).collect();

    let mut queue: VecDeque<DerivedColumn> = work_list.into();
    let mut steps: Vec<RefreshStep> = Vec::new();
    let mut resolved_ids: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    let mut since_progress = 0usize;

    while let Some(column) = queue.pop_front() {
        let name = column.qualified_name();
        let deps: BTreeSet<String> = column.dependency_names().into_iter().collect();
        let pending: Vec<&String> = deps.intersection(&refresh_names).collect();

        let ids = if pending.is_empty() {
            resolve_from_trigger(tx, trigger_table, trigger_ids, &column)?
        } else if pending.iter().all(|dep| resolved_ids.contains_key(*dep)) {
            resolve_from_dependencies(tx, &column, &pending, &resolved_ids)?
        } else {
            queue.push_back(column);
            since_progress += 1;
            if since_progress >= queue.len() {
                let remaining: Vec<String> =
                    queue.iter().map(DerivedColumn::qualified_name).collect();
                return Err(RefreshError::CycleDetected { remaining });
            }
            continue;
        };

        debug!(column = %name, targets = ids.len(), "scheduled refresh step");
        since_progress = 0;
        resolved_ids.insert(name, ids.clone());
        steps.push(RefreshStep { column, ids });
    }

    Ok(steps)
}

/// Case 1: the column depends only on physical columns. Target ids are the
/// triggering write's ids, pushed through the trigger table's selector when
/// one is recorded (the trigger table's own entry has none).
fn resolve_from_trigger(
    tx: &dyn RefreshTx,
    trigger_table: &str,
    trigger_ids: &[i64],
    column: &DerivedColumn,
) -> Result<Vec<i64>, RefreshError> {
    let selector = column
        .dependencies
        .get(trigger_table)
        .map(|dep| dep.record_ids_selector.as_str())
        .unwrap_or("");

    if selector.is_empty() {
        return Ok(dedup_sorted(trigger_ids.iter().copied()));
    }

    let ctx = SubstitutionContext::new().with_ids(trigger_table, trigger_ids);
    let ids = tx.evaluate_selector(selector, &ctx)?;
    Ok(dedup_sorted(ids.into_iter()))
}

/// Case 2: every work-list dependency is already resolved. Union the
/// dependency id sets per table, push each through this column's selector
/// for that table, and union the results.
fn resolve_from_dependencies(
    tx: &dyn RefreshTx,
    column: &DerivedColumn,
    satisfied: &[&String],
    resolved_ids: &BTreeMap<String, Vec<i64>>,
) -> Result<Vec<i64>, RefreshError> {
    let mut ids_by_table: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    for dep_name in satisfied {
        let Some((table, _)) = dep_name.split_once('.') else {
            continue;
        };
        let Some(ids) = resolved_ids.get(*dep_name) else {
            continue;
        };
        ids_by_table.entry(table).or_default().extend(ids.iter().copied());
    }

    let mut targets: BTreeSet<i64> = BTreeSet::new();
    for (table, dep_ids) in ids_by_table {
        let dep_ids: Vec<i64> = dep_ids.into_iter().collect();
        let selector = column
            .dependencies
            .get(table)
            .map(|dep| dep.record_ids_selector.as_str())
            .unwrap_or("");

        if selector.is_empty() {
            targets.extend(dep_ids);
        } else {
            let ctx = SubstitutionContext::new().with_ids(table, &dep_ids);
            targets.extend(tx.evaluate_selector(selector, &ctx)?);
        }
    }

    Ok(targets.into_iter().collect())
}

fn dedup_sorted(ids: impl Iterator<Item = i64>) -> Vec<i64> {
    let set: BTreeSet<i64> = ids.collect();
    set.into_iter().collect()
}
