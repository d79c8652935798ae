//! Core types for the cascade derived-column engine.
//!
//! This crate holds the shared vocabulary of the engine: the static table
//! metadata (models map), write actions, the derived-column model that is
//! persisted in `dynamic_column`, SQL value variants used during placeholder
//! substitution, and the cooperative cancellation token.

pub mod action;
pub mod cancel;
pub mod column;
pub mod model;
pub mod value;
