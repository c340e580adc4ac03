//! Apply layer of a change-data-capture pipeline.
//!
//! Row changes are merged per key, split into size-bounded batches and applied to a
//! MySQL-compatible destination in concurrent transactions, with bounded retries and a
//! row-at-a-time safe mode.

pub mod apply;
pub mod batch;
pub mod database;
pub mod ddl;
pub mod error;
pub mod executor;
mod macros;
pub mod merge;
pub mod metrics;
pub mod policy;
pub mod retry;
pub mod types;
