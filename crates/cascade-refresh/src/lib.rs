//! Refresh orchestrator for the cascade derived-column engine.
//!
//! Converts a write event (table, row ids, action, payload) into an ordered
//! schedule of derived-column refresh steps and executes them inside the
//! caller's transaction: impact analysis, transitive closure of dependants,
//! topological ordering, per-level row-set resolution, and execution against
//! the staging ids table.

pub mod admin;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod state;

pub use admin::CreateColumnRequest;
pub use engine::{RefreshEngine, RefreshOutcome, StepOutcome};
pub use error::RefreshError;
