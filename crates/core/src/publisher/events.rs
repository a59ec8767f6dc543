//! Events published while a run moves through its stages.

use serde::Serialize;
use serde_json::{json, Value};

use crate::stage::StageKind;
use crate::work::WorkItem;

/// State change of a run, delivered to the organization's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run was admitted and queued.
    RunCreated { work_item: WorkItem },

    /// Status changed (processing, complete or error).
    Update { work_item: WorkItem },

    /// Run-wide progress advanced.
    UpdateProgress {
        orgname: String,
        work_item_id: String,
        stage: StageKind,
        progress: f64,
    },

    /// A pipeline run was re-targeted at its next stage.
    StageAdvanced {
        orgname: String,
        work_item_id: String,
        stage_index: usize,
        stage: StageKind,
    },

    /// A cancellation was applied or recorded.
    RunCancelled {
        orgname: String,
        work_item_id: String,
        /// False when the run was mid-stage and only flagged.
        removed_from_queue: bool,
    },
}

impl RunEvent {
    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            RunEvent::RunCreated { .. } => "run_created",
            RunEvent::Update { .. } => "update",
            RunEvent::UpdateProgress { .. } => "update_progress",
            RunEvent::StageAdvanced { .. } => "stage_advanced",
            RunEvent::RunCancelled { .. } => "run_cancelled",
        }
    }

    /// Tenant the event is scoped to.
    pub fn orgname(&self) -> &str {
        match self {
            RunEvent::RunCreated { work_item } | RunEvent::Update { work_item } => {
                &work_item.orgname
            }
            RunEvent::UpdateProgress { orgname, .. }
            | RunEvent::StageAdvanced { orgname, .. }
            | RunEvent::RunCancelled { orgname, .. } => orgname,
        }
    }

    pub fn work_item_id(&self) -> &str {
        match self {
            RunEvent::RunCreated { work_item } | RunEvent::Update { work_item } => &work_item.id,
            RunEvent::UpdateProgress { work_item_id, .. }
            | RunEvent::StageAdvanced { work_item_id, .. }
            | RunEvent::RunCancelled { work_item_id, .. } => work_item_id,
        }
    }

    /// Body handed to the publisher.
    pub fn payload(&self) -> Value {
        match self {
            RunEvent::RunCreated { work_item } | RunEvent::Update { work_item } => {
                serde_json::to_value(work_item).unwrap_or(Value::Null)
            }
            RunEvent::UpdateProgress {
                work_item_id,
                stage,
                progress,
                ..
            } => json!({ "id": work_item_id, "stage": stage, "progress": progress }),
            RunEvent::StageAdvanced {
                work_item_id,
                stage_index,
                stage,
                ..
            } => json!({ "id": work_item_id, "stage_index": stage_index, "stage": stage }),
            RunEvent::RunCancelled {
                work_item_id,
                removed_from_queue,
                ..
            } => json!({ "id": work_item_id, "removed_from_queue": removed_from_queue }),
        }
    }
}
