//! Run API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use conveyor_core::{
    CancelOutcome, CreateRunRequest, StageRun, WorkItem, WorkItemFilter, WorkItemStatus,
};

use super::error::{ApiError, ApiJson};
use crate::state::AppState;

/// Maximum allowed limit for run queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for run queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing runs
#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    /// Filter by status (QUEUED, PROCESSING, COMPLETE, ERROR)
    pub status: Option<String>,
    /// Maximum number of runs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for listing runs
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<WorkItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a tool or pipeline run
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    ApiJson(body): ApiJson<CreateRunRequest>,
) -> Result<(StatusCode, Json<WorkItem>), ApiError> {
    let item = state.orchestrator().create_run(&org, body)?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Get a run by ID
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path((org, id)): Path<(String, String)>,
) -> Result<Json<WorkItem>, ApiError> {
    Ok(Json(state.orchestrator().get_run(&org, &id)?))
}

/// List an organization's runs, newest first
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = WorkItemFilter::new().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status.as_deref() {
        let status = WorkItemStatus::parse(&status.to_ascii_uppercase())
            .ok_or_else(|| ApiError::bad_request(format!("unknown status: {}", status)))?;
        filter = filter.with_status(status);
    }

    let (runs, total) = state.orchestrator().list_runs(&org, filter)?;
    Ok(Json(ListRunsResponse {
        runs,
        total,
        limit,
        offset,
    }))
}

/// Cancel a run
///
/// A queued run is removed and fails with `cancelled`. A run whose stage is
/// executing is flagged and stops at its next stage boundary.
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path((org, id)): Path<(String, String)>,
) -> Result<Json<CancelOutcome>, ApiError> {
    let outcome = state.orchestrator().cancel_run(&org, &id).await?;
    info!(
        work_item_id = %id,
        orgname = %org,
        cancelled = outcome.cancelled,
        "Cancel requested via API"
    );
    Ok(Json(outcome))
}

/// Per-stage execution records of a run
pub async fn list_stage_runs(
    State(state): State<Arc<AppState>>,
    Path((org, id)): Path<(String, String)>,
) -> Result<Json<Vec<StageRun>>, ApiError> {
    Ok(Json(state.orchestrator().stage_runs(&org, &id)?))
}
