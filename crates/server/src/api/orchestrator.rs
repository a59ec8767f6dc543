//! Orchestrator API handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use conveyor_core::{PoolStatus, StageKind};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Jobs waiting or running on one stage queue
#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub stage: StageKind,
    pub depth: i64,
}

/// Orchestrator status response
#[derive(Debug, Serialize)]
pub struct OrchestratorStatusResponse {
    /// Whether the stage pools are running
    pub running: bool,
    /// Runs admitted but not yet picked up
    pub queued_count: usize,
    /// Runs with a stage in progress or between stages
    pub processing_count: usize,
    pub pools: Vec<PoolStatus>,
    pub queues: Vec<QueueDepth>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get orchestrator status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatusResponse> {
    let orchestrator = state.orchestrator();
    let status = orchestrator.status();
    let queues = orchestrator
        .queue_depths()
        .into_iter()
        .map(|(stage, depth)| QueueDepth { stage, depth })
        .collect();

    Json(OrchestratorStatusResponse {
        running: status.running,
        queued_count: status.queued_count,
        processing_count: status.processing_count,
        pools: status.pools,
        queues,
    })
}
