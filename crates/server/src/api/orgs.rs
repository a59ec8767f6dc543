//! Organization API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use conveyor_core::Organization;

use super::error::ApiError;
use crate::state::AppState;

/// Get an organization's plan and credit balance
pub async fn get_org(
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
) -> Result<Json<Organization>, ApiError> {
    Ok(Json(state.orchestrator().organization(&org)?))
}
