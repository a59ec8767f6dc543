//! Work item types and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::StageKind;

/// Highest progress a work item can report before it completes.
pub const MAX_IN_FLIGHT_PROGRESS: f64 = 0.99;

/// What the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    /// A single tool, one stage.
    ToolRun,
    /// An ordered list of tools sharing one work item.
    PipelineRun,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::ToolRun => "TOOL_RUN",
            RunKind::PipelineRun => "PIPELINE_RUN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TOOL_RUN" => Some(RunKind::ToolRun),
            "PIPELINE_RUN" => Some(RunKind::PipelineRun),
            _ => None,
        }
    }
}

/// Status of a work item or of one of its stage runs.
///
/// Transitions only go `QUEUED -> PROCESSING -> {COMPLETE, ERROR}`, plus
/// `QUEUED -> ERROR` for cancelled or undispatchable items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Queued => "QUEUED",
            WorkItemStatus::Processing => "PROCESSING",
            WorkItemStatus::Complete => "COMPLETE",
            WorkItemStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(WorkItemStatus::Queued),
            "PROCESSING" => Some(WorkItemStatus::Processing),
            "COMPLETE" => Some(WorkItemStatus::Complete),
            "ERROR" => Some(WorkItemStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Complete | WorkItemStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Error)
                | (Processing, Processing)
                | (Processing, Complete)
                | (Processing, Error)
        )
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run: one identity carried through every stage it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Also the dispatch queue job key.
    pub id: String,
    pub orgname: String,
    pub kind: RunKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    /// Stages to execute, in order.
    pub stages: Vec<StageKind>,
    /// Index into `stages` of the current stage.
    pub stage_index: usize,
    pub stage_name: StageKind,
    pub status: WorkItemStatus,
    /// Run-wide progress in `[0, 1]`.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Content ids the run was created with.
    pub inputs: Vec<String>,
    /// Content ids produced by any stage, in production order.
    pub outputs: Vec<String>,
    /// Admission-time estimate.
    pub credits_cost: i64,
    /// Credits actually settled so far.
    pub credits_used: i64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// The stage after the current one, if any.
    pub fn next_stage(&self) -> Option<(usize, StageKind)> {
        let next = self.stage_index + 1;
        self.stages.get(next).map(|stage| (next, *stage))
    }

    /// Map a stage-local fraction onto run-wide progress.
    ///
    /// Stage `k` of `n` covers `[k/n, (k+1)/n]`. The result never reaches 1;
    /// only completion does that.
    pub fn overall_progress(&self, stage_index: usize, local: f64) -> f64 {
        let n = self.stages.len().max(1) as f64;
        let overall = (stage_index as f64 + local.clamp(0.0, 1.0)) / n;
        overall.min(MAX_IN_FLIGHT_PROGRESS)
    }
}

/// One stage execution of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    pub work_item_id: String,
    pub stage_index: usize,
    pub stage_name: StageKind,
    pub status: WorkItemStatus,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub credits_used: i64,
    /// Number of times this stage was handed to a handler.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(stages: Vec<StageKind>) -> WorkItem {
        let now = Utc::now();
        WorkItem {
            id: "wi-1".to_string(),
            orgname: "acme".to_string(),
            kind: RunKind::PipelineRun,
            tool_id: None,
            pipeline_id: Some("p".to_string()),
            stage_name: stages[0],
            stages,
            stage_index: 0,
            status: WorkItemStatus::Queued,
            progress: 0.0,
            error: None,
            inputs: vec![],
            outputs: vec![],
            credits_cost: 1,
            credits_used: 0,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        use WorkItemStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Complete));
        assert!(Processing.can_transition_to(Error));
        assert!(Queued.can_transition_to(Error));
        assert!(!Queued.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Queued));
        assert!(!Complete.can_transition_to(Error));
    }

    #[test]
    fn test_status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&WorkItemStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
        assert_eq!(
            serde_json::to_string(&RunKind::PipelineRun).unwrap(),
            "\"PIPELINE_RUN\""
        );
        assert_eq!(WorkItemStatus::parse("ERROR"), Some(WorkItemStatus::Error));
    }

    #[test]
    fn test_overall_progress_spans_stages() {
        let wi = item(vec![StageKind::ExtractText, StageKind::Summarize]);
        assert_eq!(wi.overall_progress(0, 0.5), 0.25);
        assert_eq!(wi.overall_progress(1, 0.0), 0.5);
        assert_eq!(wi.overall_progress(1, 1.0), MAX_IN_FLIGHT_PROGRESS);
    }

    #[test]
    fn test_next_stage() {
        let mut wi = item(vec![StageKind::ExtractText, StageKind::Summarize]);
        assert_eq!(wi.next_stage(), Some((1, StageKind::Summarize)));
        wi.stage_index = 1;
        assert_eq!(wi.next_stage(), None);
    }
}
