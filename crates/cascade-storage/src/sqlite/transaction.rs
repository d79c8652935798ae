//! Refresh transaction wrapper for [`SqliteStore`].
//!
//! The staging ids table lives exactly as long as the transaction: created
//! after `BEGIN`, dropped before `COMMIT`, gone with the rollback on any
//! error. Nothing the engine writes can outlive the caller's transaction.

use rusqlite::Connection;
use tracing::debug;

use cascade_core::column::{ChangeSet, DerivedColumn};
use cascade_core::model::TableDescriptor;
use cascade_core::value::RowValues;
use cascade_formula::subst::SubstitutionContext;

use crate::error::{Result, StorageError};
use crate::sqlite::columns;
use crate::sqlite::staging;
use crate::sqlite::store::SqliteStore;
use crate::traits::RefreshTx;

/// A thin wrapper around a SQLite connection that is inside a transaction.
///
/// Implements [`RefreshTx`] by delegating to the same connection-level
/// helpers used by [`SqliteStore`].
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl RefreshTx for SqliteTx<'_> {
    fn list_dependants(&self, changes: &ChangeSet) -> Result<Vec<DerivedColumn>> {
        columns::list_dependants_on_conn(self.conn, changes)
    }

    fn get_refresh_record(&self, table: &TableDescriptor, id: i64) -> Result<RowValues> {
        staging::get_refresh_record_on_conn(self.conn, table, id)
    }

    fn create_staging_table(&self) -> Result<()> {
        staging::create_staging_on_conn(self.conn)
    }

    fn load_staging(&self, ids: &[i64]) -> Result<()> {
        staging::load_staging_on_conn(self.conn, ids)
    }

    fn truncate_staging(&self) -> Result<()> {
        staging::truncate_staging_on_conn(self.conn)
    }

    fn execute_refresh(&self, column: &DerivedColumn) -> Result<usize> {
        staging::execute_refresh_on_conn(self.conn, column)
    }

    fn evaluate_selector(&self, sql: &str, ctx: &SubstitutionContext) -> Result<Vec<i64>> {
        staging::evaluate_selector_on_conn(self.conn, sql, ctx)
    }
}

impl SqliteStore {
    /// Runs `f` inside one transaction with a private staging ids table.
    ///
    /// On success the staging table is dropped and the transaction commits;
    /// on any error the transaction rolls back, reverting every staged
    /// change along with the caller's own writes.
    pub fn with_refresh_tx<T, E>(
        &self,
        f: impl FnOnce(&dyn RefreshTx) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        let guard = self.lock_conn()?;
        let conn: &Connection = &guard;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        debug!("refresh transaction started");

        let tx = SqliteTx { conn };
        if let Err(e) = tx.create_staging_table() {
            rollback(conn);
            return Err(e.into());
        }

        match f(&tx) {
            Ok(value) => {
                let finished = staging::drop_staging_on_conn(conn).and_then(|()| {
                    conn.execute_batch("COMMIT")
                        .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))
                });
                match finished {
                    Ok(()) => {
                        debug!("refresh transaction committed");
                        Ok(value)
                    }
                    Err(e) => {
                        rollback(conn);
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                rollback(conn);
                debug!("refresh transaction rolled back");
                Err(e)
            }
        }
    }
}

/// Best-effort rollback; the staging table is dropped with it.
fn rollback(conn: &Connection) {
    let _ = conn.execute_batch("ROLLBACK");
    let _ = staging::drop_staging_on_conn(conn);
}

#[cfg(test)]
mod tests {
    use cascade_core::column::ValueType;
    use cascade_core::model::STAGING_IDS_TABLE;
    use pretty_assertions::assert_eq;

    use super::*;

    fn update_column(sql: &str) -> DerivedColumn {
        DerivedColumn {
            id: 0,
            name: "total".to_string(),
            table_name: "invoice".to_string(),
            formula: String::new(),
            default_value: String::new(),
            value_type: ValueType::Float,
            variables: String::new(),
            compiled_sql: sql.to_string(),
            dependencies: Default::default(),
        }
    }

    #[test]
    fn commit_persists_and_drops_staging() {
        let store = SqliteStore::open_in_memory().unwrap();

        let staged: std::result::Result<Vec<i64>, StorageError> = store.with_refresh_tx(|tx| {
            tx.load_staging(&[1, 2])?;
            tx.evaluate_selector(
                &format!("SELECT id FROM {STAGING_IDS_TABLE} ORDER BY id"),
                &SubstitutionContext::new(),
            )
        });
        assert_eq!(staged.unwrap(), vec![1, 2]);

        // Staging table is gone after commit.
        let count: std::result::Result<i64, _> =
            store.query_value(&format!("SELECT COUNT(*) FROM {STAGING_IDS_TABLE}"), &[]);
        assert!(count.is_err());
    }

    #[test]
    fn error_rolls_back_writes_made_in_the_transaction() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE invoice (id BIGINT PRIMARY KEY, total REAL);
                 INSERT INTO invoice VALUES (1, 100.0);",
            )
            .unwrap();

        let result: std::result::Result<(), StorageError> = store.with_refresh_tx(|tx| {
            let rows =
                tx.execute_refresh(&update_column("UPDATE invoice SET total = 999.0 WHERE id = 1"))?;
            assert_eq!(rows, 1);
            Err(StorageError::Transaction("boom".into()))
        });
        assert!(result.is_err());

        let total: f64 = store
            .query_value("SELECT total FROM invoice WHERE id = 1", &[])
            .unwrap();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn staging_table_is_fresh_per_transaction() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first: std::result::Result<(), StorageError> = store.with_refresh_tx(|tx| {
            tx.load_staging(&[7])?;
            Err(StorageError::Transaction("abort".into()))
        });
        assert!(first.is_err());

        let second: std::result::Result<Vec<i64>, StorageError> = store.with_refresh_tx(|tx| {
            tx.evaluate_selector(
                &format!("SELECT id FROM {STAGING_IDS_TABLE}"),
                &SubstitutionContext::new(),
            )
        });
        assert_eq!(second.unwrap(), Vec::<i64>::new());
    }
}
