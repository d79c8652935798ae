//! Dependency store for the cascade derived-column engine.
//!
//! Persists derived-column metadata and provides the transaction-scoped
//! operations the refresh orchestrator consumes: dependant queries, the
//! staging ids table, record-locator evaluation, and refresh execution.

pub mod error;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::{DependencyStore, RefreshTx};

// ---------------------------------------------------------------------------
// DependencyStore trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use cascade_core::column::DerivedColumn;

use crate::error::Result;
use crate::sqlite::columns;

impl DependencyStore for SqliteStore {
    fn create_column(&self, column: &DerivedColumn) -> Result<DerivedColumn> {
        let conn = self.lock_conn()?;
        columns::insert_column_on_conn(&conn, column)
    }

    fn get_all(&self) -> Result<Vec<DerivedColumn>> {
        let conn = self.lock_conn()?;
        columns::get_all_on_conn(&conn)
    }

    fn get_all_by_table(&self, table: &str) -> Result<Vec<DerivedColumn>> {
        let conn = self.lock_conn()?;
        columns::get_all_by_table_on_conn(&conn, table)
    }

    fn get_by_dependency(&self, dotted: &str) -> Result<Vec<DerivedColumn>> {
        let conn = self.lock_conn()?;
        columns::get_by_dependency_on_conn(&conn, dotted)
    }
}
