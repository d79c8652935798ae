//! Formula data model and compile-time errors.

use cascade_core::column::DependencyMap;
use cascade_relation::RelationError;

/// A user-declared aggregate variable: `var <name> = <expr>`.
///
/// The expression aggregates over exactly one table; that table owns the
/// variable and projects it from its CTE under the variable's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Raw right-hand side, `{{t}}.col` placeholders intact.
    pub expr: String,
    /// The single table every placeholder in `expr` names.
    pub table: String,
}

/// A `{{table}}.column` placeholder found while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// One per-related-table CTE plus the join that attaches it to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaCte {
    pub name: String,
    pub sql: String,
    pub join: String,
}

/// Compiler output: the executable statement and the derived dependency map.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    /// Full `WITH … UPDATE … FROM` statement, executable against a
    /// populated staging ids table.
    pub sql: String,
    /// Per-table columns read and record-locator selectors.
    pub dependencies: DependencyMap,
}

/// Authoring-time formula errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// A non-blank variable line does not start with the `var` keyword.
    #[error("variable line missing `var` keyword: {line}")]
    NoVarKeyword { line: String },

    /// A variable line has no `=` assignment.
    #[error("variable line missing `=` assignment: {line}")]
    NoAssign { line: String },

    /// A variable expression contains no `{{table}}.column` reference.
    #[error("variable `{name}` references no table column")]
    NoTableInVar { name: String },

    /// A single variable expression references more than one table.
    #[error("variable `{name}` references multiple tables: {first}, {second}")]
    MixedTablesInVar {
        name: String,
        first: String,
        second: String,
    },

    /// A placeholder names a table absent from the models map.
    #[error("unknown table referenced in formula: {table}")]
    UnknownTable { table: String },

    /// No FK path from the root table to a referenced table.
    #[error(transparent)]
    NoRelation(#[from] RelationError),
}
