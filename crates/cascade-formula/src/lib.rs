//! Formula compiler for the cascade derived-column engine.
//!
//! A formula is a SQL expression template over `{{table}}.column`
//! placeholders plus user-declared aggregate variables. The compiler lowers
//! it once, at authoring time, into a single statement: a chain of CTEs that
//! join related tables back to the root, and an `UPDATE … FROM` step guarded
//! by `IS DISTINCT FROM`. It also derives the per-table dependency entries
//! (columns read, record-locator SQL) that drive impact analysis on writes.

pub mod compiler;
pub mod parser;
pub mod subst;
pub mod types;

pub use compiler::compile;
pub use types::{CompiledFormula, FormulaError};
