//! Rendering hop chains as SQL join chains.
//!
//! The forward chain (`LEFT JOIN`, soft-delete filtered) feeds the formula
//! compiler's CTEs; the inverted chain (`INNER JOIN`) feeds record-locator
//! queries that map changed dependency rows back to root-table ids.

use crate::graph::{RelationKind, RelationLink};

/// Join condition for one hop from `near` to `far`.
///
/// * many_to_one: `near.<far>_id = far.id`
/// * one_to_many: `far.<near>_id = near.id`
fn hop_condition(near: &str, far: &str, kind: RelationKind) -> String {
    match kind {
        RelationKind::ManyToOne => format!("{near}.{far}_id = {far}.id"),
        RelationKind::OneToMany => format!("{far}.{near}_id = {near}.id"),
    }
}

/// Renders the hop list as a `LEFT JOIN` chain starting from `start`.
///
/// Every join filters soft-deleted rows of the joined table. Joins are
/// newline separated so callers can indent them into a statement.
pub fn left_join_chain(start: &str, links: &[RelationLink]) -> String {
    let mut previous = start;
    let mut joins = Vec::with_capacity(links.len());

    for link in links {
        joins.push(format!(
            "LEFT JOIN {table} ON {cond} AND {table}.is_deleted = false",
            table = link.table,
            cond = hop_condition(previous, &link.table, link.kind),
        ));
        previous = &link.table;
    }

    joins.join("\n")
}

/// Renders the hop list inverted: an `INNER JOIN` chain walking from the
/// final hop table back to `root`, using the same edges.
pub fn inverse_join_chain(root: &str, links: &[RelationLink]) -> String {
    let mut joins = Vec::with_capacity(links.len());

    for (i, link) in links.iter().enumerate().rev() {
        let near = if i == 0 { root } else { &links[i - 1].table };
        joins.push(format!(
            "JOIN {near} ON {cond}",
            cond = hop_condition(near, &link.table, link.kind),
        ));
    }

    joins.join("\n")
}

/// The FK columns a hop reads, as `(table, column)` pairs.
///
/// The holder of the FK depends on the edge direction; `id` on the far side
/// of the condition is implicit and not reported.
pub fn hop_columns(near: &str, far: &str, kind: RelationKind) -> (String, String) {
    match kind {
        RelationKind::ManyToOne => (near.to_string(), format!("{far}_id")),
        RelationKind::OneToMany => (far.to_string(), format!("{near}_id")),
    }
}
