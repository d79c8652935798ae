//! Derived-column persistence and dependant queries.
//!
//! The coarse dependant filter runs in the database: `json_each` over the
//! `dependencies` map tests whether its keyset intersects the changed
//! tables. The fine filter (column intersection per table) runs in-process
//! on the candidate list.

use std::collections::BTreeSet;

use rusqlite::{Connection, Row, params};

use cascade_core::column::{ChangeSet, DependencyMap, DerivedColumn, ValueType};

use crate::error::{Result, StorageError};

/// All `dynamic_column` columns in a deterministic order for SELECT queries.
pub(crate) const DYNAMIC_COLUMN_COLUMNS: &str =
    "id, name, table_name, formula, default_value, type, dependencies, variables, compiled_sql";

/// Deserialises a row into a [`DerivedColumn`].
///
/// The column order MUST match [`DYNAMIC_COLUMN_COLUMNS`].
pub(crate) fn scan_column(row: &Row<'_>) -> Result<DerivedColumn> {
    let id: i64 = row.get("id")?;
    let name: String = row.get("name")?;
    let table_name: String = row.get("table_name")?;
    let formula: String = row.get("formula")?;
    let default_value: String = row.get("default_value")?;
    let type_str: String = row.get("type")?;
    let dependencies_str: String = row.get("dependencies")?;
    let variables: String = row.get("variables")?;
    let compiled_sql: String = row.get("compiled_sql")?;

    let value_type = ValueType::parse(&type_str).ok_or_else(|| StorageError::Validation {
        message: format!("unknown value type `{type_str}` on {table_name}.{name}"),
    })?;
    let dependencies: DependencyMap = serde_json::from_str(&dependencies_str)?;

    Ok(DerivedColumn {
        id,
        name,
        table_name,
        formula,
        default_value,
        value_type,
        variables,
        compiled_sql,
        dependencies,
    })
}

/// Runs a SELECT over `dynamic_column` and scans every row.
fn query_columns(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DerivedColumn>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(scan_column(row)?);
    }
    Ok(columns)
}

/// Persists a derived column, returning it with the assigned id.
pub(crate) fn insert_column_on_conn(
    conn: &Connection,
    column: &DerivedColumn,
) -> Result<DerivedColumn> {
    let dependencies = serde_json::to_string(&column.dependencies)?;
    conn.execute(
        "INSERT INTO dynamic_column
         (name, table_name, formula, default_value, type, dependencies, variables, compiled_sql)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            column.name,
            column.table_name,
            column.formula,
            column.default_value,
            column.value_type.as_str(),
            dependencies,
            column.variables,
            column.compiled_sql,
        ],
    )?;

    let mut created = column.clone();
    created.id = conn.last_insert_rowid();
    Ok(created)
}

/// All derived columns, ordered by id.
pub(crate) fn get_all_on_conn(conn: &Connection) -> Result<Vec<DerivedColumn>> {
    query_columns(
        conn,
        &format!("SELECT {DYNAMIC_COLUMN_COLUMNS} FROM dynamic_column ORDER BY id"),
        [],
    )
}

/// All derived columns on one root table, ordered by id.
pub(crate) fn get_all_by_table_on_conn(conn: &Connection, table: &str) -> Result<Vec<DerivedColumn>> {
    query_columns(
        conn,
        &format!(
            "SELECT {DYNAMIC_COLUMN_COLUMNS} FROM dynamic_column WHERE table_name = ?1 ORDER BY id"
        ),
        params![table],
    )
}

/// Diagnostic lookup by a `"table.column"` dependency key.
pub(crate) fn get_by_dependency_on_conn(conn: &Connection, dotted: &str) -> Result<Vec<DerivedColumn>> {
    let Some((table, column)) = dotted.split_once('.') else {
        return Err(StorageError::Validation {
            message: format!("dependency key must be `table.column`, got `{dotted}`"),
        });
    };

    let candidates = query_columns(
        conn,
        &format!(
            "SELECT {DYNAMIC_COLUMN_COLUMNS} FROM dynamic_column
             WHERE EXISTS (
                 SELECT 1 FROM json_each(dynamic_column.dependencies)
                 WHERE json_each.key = ?1
             )
             ORDER BY id"
        ),
        params![table],
    )?;

    Ok(candidates
        .into_iter()
        .filter(|col| {
            col.dependencies
                .get(table)
                .is_some_and(|dep| dep.columns.iter().any(|c| c == column))
        })
        .collect())
}

/// Coarse-then-fine dependant query for a change set.
pub(crate) fn list_dependants_on_conn(
    conn: &Connection,
    changes: &ChangeSet,
) -> Result<Vec<DerivedColumn>> {
    if changes.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<String> = (1..=changes.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {DYNAMIC_COLUMN_COLUMNS} FROM dynamic_column
         WHERE EXISTS (
             SELECT 1 FROM json_each(dynamic_column.dependencies)
             WHERE json_each.key IN ({})
         )
         ORDER BY id",
        placeholders.join(", ")
    );

    let candidates = query_columns(conn, &sql, rusqlite::params_from_iter(changes.keys()))?;
    Ok(filter_by_touched_columns(candidates, changes))
}

/// Fine filter: keep columns whose recorded dependency columns for some
/// changed table intersect that table's touched columns.
pub(crate) fn filter_by_touched_columns(
    candidates: Vec<DerivedColumn>,
    changes: &ChangeSet,
) -> Vec<DerivedColumn> {
    candidates
        .into_iter()
        .filter(|col| {
            changes.iter().any(|(table, touched)| {
                col.dependencies
                    .get(table)
                    .is_some_and(|dep| intersects(&dep.columns, touched))
            })
        })
        .collect()
}

fn intersects(columns: &[String], touched: &BTreeSet<String>) -> bool {
    columns.iter().any(|c| touched.contains(c))
}
