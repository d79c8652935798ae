//! Administrative operations: authoring derived columns.

use tracing::info;

use cascade_core::column::{DerivedColumn, ValueType};
use cascade_formula::compile;
use cascade_storage::DependencyStore;

use crate::engine::RefreshEngine;
use crate::error::RefreshError;

/// Request to create a derived column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateColumnRequest {
    /// Root table owning the physical column.
    pub table: String,
    /// Physical column name that holds the computed value.
    pub name: String,
    pub value_type: ValueType,
    /// Formula template over `{{table}}.column` placeholders.
    pub formula: String,
    /// Variable declarations, one `var name = expr` per line.
    pub variables: String,
    pub default_value: String,
}

impl RefreshEngine {
    /// Compiles and persists a derived column.
    ///
    /// The formula is compiled exactly once here; refresh paths execute the
    /// stored statement. Nothing is persisted when compilation fails.
    pub fn create_derived_column(
        &self,
        store: &dyn DependencyStore,
        req: CreateColumnRequest,
    ) -> Result<DerivedColumn, RefreshError> {
        if self.models().get(&req.table).is_none() {
            return Err(RefreshError::model_not_found(&req.table));
        }

        let compiled = compile(
            self.models(),
            self.graph(),
            &req.table,
            &req.name,
            &req.formula,
            &req.variables,
        )?;

        let column = DerivedColumn {
            id: 0,
            name: req.name,
            table_name: req.table,
            formula: req.formula,
            default_value: req.default_value,
            value_type: req.value_type,
            variables: req.variables,
            compiled_sql: compiled.sql,
            dependencies: compiled.dependencies,
        };

        let created = store.create_column(&column)?;
        info!(column = %created.qualified_name(), id = created.id, "derived column created");
        Ok(created)
    }
}
