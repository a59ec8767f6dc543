//! Types for the run orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::CatalogError;
use crate::content::ContentError;
use crate::credits::CreditError;
use crate::pool::PoolStatus;
use crate::queue::{QueueError, RemoveOutcome};
use crate::stage::{RegistryError, StageKind};
use crate::work::{RunKind, WorkItem, WorkItemError};

/// Errors surfaced synchronously by `create_run`, `get_run` and `cancel_run`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request is missing or contradicts required fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced run, content, tool or pipeline does not exist for the
    /// organization.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// A collaborator (store, queue) failed.
    #[error("internal failure: {0}")]
    InternalFailure(String),
}

impl OrchestratorError {
    /// Label used for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidInput(_) => "invalid_input",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::InsufficientCredits { .. } => "insufficient_credits",
            OrchestratorError::InternalFailure(_) => "internal",
        }
    }
}

impl From<WorkItemError> for OrchestratorError {
    fn from(err: WorkItemError) -> Self {
        match err {
            WorkItemError::NotFound(id) => OrchestratorError::NotFound(format!("run {}", id)),
            other => OrchestratorError::InternalFailure(other.to_string()),
        }
    }
}

impl From<ContentError> for OrchestratorError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(id) => OrchestratorError::NotFound(format!("content {}", id)),
            ContentError::Invalid(msg) => OrchestratorError::InvalidInput(msg),
            ContentError::Database(msg) => OrchestratorError::InternalFailure(msg),
        }
    }
}

impl From<CreditError> for OrchestratorError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::InsufficientCredits {
                required,
                available,
                ..
            } => OrchestratorError::InsufficientCredits {
                required,
                available,
            },
            CreditError::OrganizationNotFound(org) => {
                OrchestratorError::NotFound(format!("organization {}", org))
            }
            other => OrchestratorError::InternalFailure(other.to_string()),
        }
    }
}

impl From<QueueError> for OrchestratorError {
    fn from(err: QueueError) -> Self {
        OrchestratorError::InternalFailure(err.to_string())
    }
}

impl From<CatalogError> for OrchestratorError {
    fn from(err: CatalogError) -> Self {
        OrchestratorError::InternalFailure(err.to_string())
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(err: RegistryError) -> Self {
        OrchestratorError::InternalFailure(err.to_string())
    }
}

/// Client request to start a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRunRequest {
    pub kind: Option<RunKind>,
    #[serde(default, alias = "toolId", skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, alias = "pipelineId", skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    /// Existing content to use as input, in order.
    #[serde(default, alias = "contentIds", skip_serializing_if = "Vec::is_empty")]
    pub content_ids: Vec<String>,
    /// Inline text; becomes a new content row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remote document; becomes a new content row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Title for content created from `text` or `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl CreateRunRequest {
    pub fn tool(tool_id: impl Into<String>) -> Self {
        Self {
            kind: Some(RunKind::ToolRun),
            tool_id: Some(tool_id.into()),
            ..Default::default()
        }
    }

    pub fn pipeline(pipeline_id: impl Into<String>) -> Self {
        Self {
            kind: Some(RunKind::PipelineRun),
            pipeline_id: Some(pipeline_id.into()),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_content_ids(mut self, ids: Vec<String>) -> Self {
        self.content_ids = ids;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Whether any input source was supplied.
    pub fn has_inputs(&self) -> bool {
        !self.content_ids.is_empty() || self.text.is_some() || self.url.is_some()
    }
}

/// Queue payload telling an executor which stage of the item to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub stage_index: usize,
    pub stage: StageKind,
}

impl DispatchPayload {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// What `cancel_run` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub work_item: WorkItem,
    pub queue: RemoveOutcome,
    /// True when the run was still queued and is now terminal.
    pub cancelled: bool,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub queued_count: usize,
    pub processing_count: usize,
    pub pools: Vec<PoolStatus>,
}
