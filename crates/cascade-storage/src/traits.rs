//! Storage traits consumed by the refresh orchestrator.

use cascade_core::column::{ChangeSet, DerivedColumn};
use cascade_core::model::TableDescriptor;
use cascade_core::value::RowValues;
use cascade_formula::subst::SubstitutionContext;

use crate::error::Result;

/// Store-level operations on derived-column metadata (admin / authoring).
pub trait DependencyStore {
    /// Persists a compiled derived column, returning it with its id set.
    fn create_column(&self, column: &DerivedColumn) -> Result<DerivedColumn>;

    /// All derived columns, ordered by id.
    fn get_all(&self) -> Result<Vec<DerivedColumn>>;

    /// All derived columns declared on the given root table.
    fn get_all_by_table(&self, table: &str) -> Result<Vec<DerivedColumn>>;

    /// Diagnostic lookup by a `"table.column"` dependency key.
    fn get_by_dependency(&self, dotted: &str) -> Result<Vec<DerivedColumn>>;
}

/// Operations available inside one refresh transaction.
///
/// Every call may block on the database; the caller's transaction
/// serialises them. The staging ids table is private to the transaction.
pub trait RefreshTx {
    /// Derived columns whose dependency tables intersect the change set and
    /// whose recorded columns for such a table intersect the touched
    /// columns.
    fn list_dependants(&self, changes: &ChangeSet) -> Result<Vec<DerivedColumn>>;

    /// Loads one row of an arbitrary participating table as a
    /// column-to-value map, using its static descriptor.
    fn get_refresh_record(&self, table: &TableDescriptor, id: i64) -> Result<RowValues>;

    /// Creates the session-local staging ids table.
    fn create_staging_table(&self) -> Result<()>;

    /// Inserts target ids into the staging table, in batches.
    fn load_staging(&self, ids: &[i64]) -> Result<()>;

    /// Removes all rows from the staging table.
    fn truncate_staging(&self) -> Result<()>;

    /// Executes a derived column's compiled statement against the staged
    /// ids. Returns the number of rows actually updated.
    fn execute_refresh(&self, column: &DerivedColumn) -> Result<usize>;

    /// Runs a record-locator query after placeholder substitution and
    /// coerces nullable ids to a plain id list.
    fn evaluate_selector(&self, sql: &str, ctx: &SubstitutionContext) -> Result<Vec<i64>>;
}
