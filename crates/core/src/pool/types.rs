//! Types for the stage worker pools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::queue::Lease;
use crate::stage::{StageContext, StageError, StageKind, StageOutput};

/// Status of one stage's worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub stage: StageKind,
    pub queue: String,
    pub running: bool,
    /// Executions currently holding a permit.
    pub active: usize,
    pub max_concurrency: usize,
    /// Executions that finished successfully.
    pub processed: u64,
    pub failed: u64,
}

/// What to do with a lease once a stage succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The work item is done with the queue.
    Ack,
    /// Move the same job to the next stage's queue.
    Forward { queue: String, payload: String },
}

/// Outcome of granting a lease.
pub enum Activation {
    /// Run the stage handler with this context.
    Run(StageContext),
    /// Nothing to execute; settle the lease right away.
    Settle(Disposition),
}

/// Hooks a pool invokes as a leased work item moves through its stage.
///
/// The pool owns leasing, concurrency and heartbeats. Everything that
/// touches the work item goes through these hooks.
#[async_trait]
pub trait StageLifecycle: Send + Sync {
    /// A lease was granted. Decides whether the handler runs.
    async fn on_active(&self, lease: &Lease) -> Result<Activation, StageError>;

    /// The handler succeeded.
    async fn on_completed(
        &self,
        ctx: &StageContext,
        output: StageOutput,
    ) -> Result<Disposition, StageError>;

    /// The handler or `on_active` failed for good. The job is acked after.
    async fn on_failed(&self, lease: &Lease, error: &StageError);

    /// The job was taken off its queue before any executor leased it.
    async fn on_removed(&self, job_key: &str);
}
