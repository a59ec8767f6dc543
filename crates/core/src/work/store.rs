//! Work item storage trait and request types.

use thiserror::Error;

use crate::stage::StageKind;

use super::{RunKind, StageRun, WorkItem, WorkItemStatus};

/// Error type for work item operations.
#[derive(Debug, Error)]
pub enum WorkItemError {
    #[error("work item not found: {0}")]
    NotFound(String),

    /// The state machine forbids the requested change.
    #[error("cannot move work item {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: WorkItemStatus,
        to: WorkItemStatus,
    },

    #[error("database error: {0}")]
    Database(String),
}

/// Request to persist a new work item.
#[derive(Debug, Clone)]
pub struct CreateWorkItemRequest {
    pub orgname: String,
    pub kind: RunKind,
    pub tool_id: Option<String>,
    pub pipeline_id: Option<String>,
    /// Must not be empty.
    pub stages: Vec<StageKind>,
    pub inputs: Vec<String>,
    pub credits_cost: i64,
}

/// Filter for listing work items.
#[derive(Debug, Clone, Default)]
pub struct WorkItemFilter {
    pub orgname: Option<String>,
    pub status: Option<WorkItemStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl WorkItemFilter {
    pub fn new() -> Self {
        Self {
            orgname: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_orgname(mut self, orgname: impl Into<String>) -> Self {
        self.orgname = Some(orgname.into());
        self
    }

    pub fn with_status(mut self, status: WorkItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for work item storage backends.
///
/// Every status change is a guarded update: the store refuses transitions
/// the state machine does not allow, so concurrent writers cannot move a
/// terminal item.
pub trait WorkItemStore: Send + Sync {
    /// Persist a new item in `QUEUED` with progress 0, plus the stage run
    /// for its first stage.
    fn create(&self, request: CreateWorkItemRequest) -> Result<WorkItem, WorkItemError>;

    fn get(&self, id: &str) -> Result<Option<WorkItem>, WorkItemError>;

    /// Get an item only if it belongs to `orgname`.
    fn find_for_org(&self, orgname: &str, id: &str) -> Result<Option<WorkItem>, WorkItemError>;

    fn list(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>, WorkItemError>;

    fn count(&self, filter: &WorkItemFilter) -> Result<i64, WorkItemError>;

    /// `QUEUED -> PROCESSING`, setting `started_at`. A no-op when the item
    /// is already processing (redelivery, or the next pipeline stage).
    fn mark_processing(&self, id: &str) -> Result<WorkItem, WorkItemError>;

    /// Raise progress to `progress` (capped below 1). Never lowers it and
    /// ignores items that are not processing. Returns the stored value.
    fn advance_progress(&self, id: &str, progress: f64) -> Result<f64, WorkItemError>;

    /// Re-target a processing item at `stage_index`, recording the stage
    /// run that will receive `inputs`.
    fn advance_stage(
        &self,
        id: &str,
        stage_index: usize,
        inputs: &[String],
    ) -> Result<WorkItem, WorkItemError>;

    /// Append output ids, skipping ones already attached.
    fn attach_outputs(&self, id: &str, outputs: &[String]) -> Result<WorkItem, WorkItemError>;

    /// Record settled credits on the item and on the given stage run.
    fn add_credits_used(
        &self,
        id: &str,
        stage_index: usize,
        credits: i64,
    ) -> Result<(), WorkItemError>;

    /// `PROCESSING -> COMPLETE` with progress 1.
    fn complete(&self, id: &str) -> Result<WorkItem, WorkItemError>;

    /// `QUEUED | PROCESSING -> ERROR` with a non-empty message.
    fn fail(&self, id: &str, error: &str) -> Result<WorkItem, WorkItemError>;

    /// Flag a live item for cancellation at its next stage boundary.
    fn request_cancel(&self, id: &str) -> Result<WorkItem, WorkItemError>;

    /// Mark a stage run as handed to a handler and bump its attempt count.
    fn begin_stage_run(&self, id: &str, stage_index: usize) -> Result<StageRun, WorkItemError>;

    fn complete_stage_run(
        &self,
        id: &str,
        stage_index: usize,
        outputs: &[String],
    ) -> Result<StageRun, WorkItemError>;

    fn fail_stage_run(&self, id: &str, stage_index: usize, error: &str)
        -> Result<(), WorkItemError>;

    fn stage_run(&self, id: &str, stage_index: usize) -> Result<Option<StageRun>, WorkItemError>;

    /// All stage runs of an item, in stage order.
    fn stage_runs(&self, id: &str) -> Result<Vec<StageRun>, WorkItemError>;
}
