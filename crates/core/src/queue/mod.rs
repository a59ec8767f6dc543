//! Durable at-least-once dispatch queue, one named queue per stage.
//!
//! Jobs are keyed by work item id: a key can be present at most once, and a
//! present job can be leased by at most one executor at a time. A lease that
//! is neither acknowledged nor extended expires and the job becomes
//! deliverable again.

mod sqlite;
mod types;

pub use sqlite::SqliteDispatchQueue;
pub use types::*;
