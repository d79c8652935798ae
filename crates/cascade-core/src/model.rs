//! Static table metadata -- the models map.
//!
//! Each participating table is described once at startup by a
//! [`TableDescriptor`]: its physical column names plus foreign-key hints
//! derived from the `<other>_id` naming convention. The descriptors replace
//! runtime struct reflection; everything the relationship graph and the
//! refresh gate need is available as plain data.

use std::collections::BTreeMap;

/// Column name every participating table carries as its primary key.
pub const ID_COLUMN: &str = "id";

/// Soft-delete flag present on every participating table.
pub const IS_DELETED_COLUMN: &str = "is_deleted";

/// Session-scoped temporary table holding the root-table ids targeted by the
/// current refresh step.
pub const STAGING_IDS_TABLE: &str = "tmp_dynamiccolumn_ids";

/// One physical column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Physical column name.
    pub column: String,

    /// Table this column references, when the column follows the
    /// `<table>_id` convention (e.g. `invoice_id` -> `invoice`).
    pub fk_target: Option<String>,
}

impl FieldDescriptor {
    /// Builds a descriptor, deriving the FK target from the column name.
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        let fk_target = column
            .strip_suffix("_id")
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_string);
        Self { column, fk_target }
    }

    /// Returns `true` if this column is a foreign key hint.
    pub fn is_fk(&self) -> bool {
        self.fk_target.is_some()
    }
}

/// Static description of one table: name plus physical columns.
///
/// `id` and `is_deleted` are implicit on every table and seeded by
/// [`TableDescriptor::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    /// Creates a descriptor with the implicit `id` and `is_deleted` columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![
                FieldDescriptor {
                    column: ID_COLUMN.to_string(),
                    fk_target: None,
                },
                FieldDescriptor::new(IS_DELETED_COLUMN),
            ],
        }
    }

    /// Adds a physical column (builder style).
    pub fn field(mut self, column: impl Into<String>) -> Self {
        let field = FieldDescriptor::new(column);
        if !self.has_column(&field.column) {
            self.fields.push(field);
        }
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All physical column names, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }

    /// All field descriptors.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Returns `true` if the table has a column with this exact name.
    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.column == column)
    }
}

/// The process-wide map of table descriptors, built once at startup and
/// read-only thereafter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelsMap {
    tables: BTreeMap<String, TableDescriptor>,
}

impl ModelsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table descriptor (builder style).
    pub fn register(mut self, table: TableDescriptor) -> Self {
        self.tables.insert(table.name().to_string(), table);
        self
    }

    /// Looks up a table by name.
    pub fn get(&self, table: &str) -> Option<&TableDescriptor> {
        self.tables.get(table)
    }

    /// All registered tables, sorted by name.
    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    /// Returns `true` if no tables are registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_descriptor_derives_fk_target() {
        let f = FieldDescriptor::new("invoice_id");
        assert!(f.is_fk());
        assert_eq!(f.fk_target.as_deref(), Some("invoice"));

        let plain = FieldDescriptor::new("amount");
        assert!(!plain.is_fk());
        assert_eq!(plain.fk_target, None);
    }

    #[test]
    fn bare_id_suffix_is_not_a_fk() {
        let f = FieldDescriptor::new("_id");
        assert!(!f.is_fk());
    }

    #[test]
    fn descriptor_seeds_implicit_columns() {
        let t = TableDescriptor::new("payment").field("amount").field("invoice_id");
        let cols: Vec<&str> = t.columns().collect();
        assert_eq!(cols, vec!["id", "is_deleted", "amount", "invoice_id"]);
        assert!(t.has_column("invoice_id"));
        assert!(!t.has_column("contract_id"));
    }

    #[test]
    fn duplicate_fields_are_ignored() {
        let t = TableDescriptor::new("payment").field("amount").field("amount");
        assert_eq!(t.columns().filter(|c| *c == "amount").count(), 1);
    }

    #[test]
    fn models_map_lookup() {
        let models = ModelsMap::new()
            .register(TableDescriptor::new("invoice").field("total_amount"))
            .register(TableDescriptor::new("payment").field("invoice_id"));

        assert!(models.get("invoice").is_some());
        assert!(models.get("unknown").is_none());
        let names: Vec<&str> = models.tables().map(|t| t.name()).collect();
        assert_eq!(names, vec!["invoice", "payment"]);
    }
}
