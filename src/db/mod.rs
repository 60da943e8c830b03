//! Queue store: the durable `queue_items` table and the cached remote session.
//!
//! - `model`: slices returned by aggregate queries.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `assembly_runner::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{QueueCounts, StatusCount};
