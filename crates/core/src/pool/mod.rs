//! Stage worker pools.
//!
//! One [`StagePool`] per registered stage pulls leases from the stage's
//! dispatch queue, bounded by the stage's concurrency limit, and drives each
//! leased work item through a [`StageLifecycle`]:
//!
//! - `on_active` when the lease is granted, deciding whether the handler runs
//! - `on_completed` when the handler succeeds, deciding whether the job is
//!   acked or forwarded to the next stage's queue
//! - `on_failed` when the handler (after its own retries) or the lifecycle
//!   gives up
//!
//! Leases are extended by a heartbeat while the handler runs. An executor
//! that dies stops heartbeating and its job is redelivered once the lease
//! expires.

mod config;
mod types;
mod worker;

pub use config::PoolConfig;
pub use types::{Activation, Disposition, PoolStatus, StageLifecycle};
pub use worker::StagePool;
