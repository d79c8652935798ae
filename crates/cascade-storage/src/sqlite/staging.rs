//! Staging-table operations, selector evaluation, and refresh execution.

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::debug;

use cascade_core::column::DerivedColumn;
use cascade_core::model::{STAGING_IDS_TABLE, TableDescriptor};
use cascade_core::value::{RowValues, SqlValue};
use cascade_formula::subst::{SubstitutionContext, substitute};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// Ids per multi-row INSERT, well under any single-statement parameter
/// limit.
pub(crate) const STAGING_BATCH_SIZE: usize = 5_000;

/// Creates the session-local staging ids table.
pub(crate) fn create_staging_on_conn(conn: &Connection) -> Result<()> {
    conn.execute_batch(&schema::staging_table_ddl())?;
    Ok(())
}

/// Drops the staging table.
pub(crate) fn drop_staging_on_conn(conn: &Connection) -> Result<()> {
    conn.execute_batch(&schema::staging_table_drop())?;
    Ok(())
}

/// Removes all staged ids.
pub(crate) fn truncate_staging_on_conn(conn: &Connection) -> Result<()> {
    conn.execute(&format!("DELETE FROM {STAGING_IDS_TABLE}"), [])?;
    Ok(())
}

/// Inserts target ids in multi-row VALUES batches.
pub(crate) fn load_staging_on_conn(conn: &Connection, ids: &[i64]) -> Result<()> {
    for chunk in ids.chunks(STAGING_BATCH_SIZE) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("(?{i})")).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO {STAGING_IDS_TABLE} (id) VALUES {}",
            placeholders.join(",")
        );
        conn.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
    }
    debug!(count = ids.len(), "staged target ids");
    Ok(())
}

/// Executes a derived column's compiled statement. Returns rows updated.
pub(crate) fn execute_refresh_on_conn(conn: &Connection, column: &DerivedColumn) -> Result<usize> {
    if column.compiled_sql.is_empty() {
        return Err(StorageError::Validation {
            message: format!("derived column {} has no compiled SQL", column.qualified_name()),
        });
    }
    let rows = conn.execute(&column.compiled_sql, [])?;
    debug!(column = %column.qualified_name(), rows, "executed refresh statement");
    Ok(rows)
}

/// Runs a record-locator query after placeholder substitution, dropping
/// NULL ids from the result.
pub(crate) fn evaluate_selector_on_conn(
    conn: &Connection,
    sql: &str,
    ctx: &SubstitutionContext,
) -> Result<Vec<i64>> {
    let bound = substitute(sql, ctx);
    debug!(query = %bound, "evaluating record-ids selector");

    let mut stmt = conn.prepare(&bound)?;
    let mut rows = stmt.query([])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let id: Option<i64> = row.get(0)?;
        if let Some(id) = id {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Loads one row of a participating table as a column-to-value map.
pub(crate) fn get_refresh_record_on_conn(
    conn: &Connection,
    table: &TableDescriptor,
    id: i64,
) -> Result<RowValues> {
    let columns: Vec<&str> = table.columns().collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        columns.join(", "),
        table.name()
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    let Some(row) = rows.next()? else {
        return Err(StorageError::not_found(table.name(), id.to_string()));
    };

    let mut values = RowValues::new();
    for (i, column) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => SqlValue::Null,
        };
        values.insert((*column).to_string(), value);
    }
    Ok(values)
}
