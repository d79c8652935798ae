//! DDL statements for the dependency store.
//!
//! SQLite types: JSON maps are TEXT, the `type` column stores the
//! [`ValueType`](cascade_core::column::ValueType) string form. Participating
//! data tables are caller-owned; only `dynamic_column` and the staging table
//! belong to the engine.

use cascade_core::model::STAGING_IDS_TABLE;

/// Core DDL executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS dynamic_column (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        name          TEXT NOT NULL,
        table_name    TEXT NOT NULL,
        formula       TEXT NOT NULL DEFAULT '',
        default_value TEXT NOT NULL DEFAULT '',
        type          TEXT NOT NULL DEFAULT 'string',
        dependencies  TEXT NOT NULL DEFAULT '{}',
        variables     TEXT NOT NULL DEFAULT '',
        compiled_sql  TEXT NOT NULL DEFAULT '',
        UNIQUE (table_name, name)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dynamic_column_table ON dynamic_column(table_name)",
];

/// Staging table DDL, session-local and owned by the transaction wrapper.
pub fn staging_table_ddl() -> String {
    format!("CREATE TEMP TABLE IF NOT EXISTS {STAGING_IDS_TABLE} (id BIGINT PRIMARY KEY)")
}

/// Staging table teardown, executed before commit.
pub fn staging_table_drop() -> String {
    format!("DROP TABLE IF EXISTS {STAGING_IDS_TABLE}")
}
