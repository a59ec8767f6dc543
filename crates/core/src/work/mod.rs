//! Durable record of runs and their per-stage executions.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteWorkItemStore;
pub use store::*;
pub use types::*;
