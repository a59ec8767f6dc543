use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, middleware::metrics_middleware, orchestrator, orgs, runs, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(orchestrator::get_status))
        // Organizations
        .route("/orgs/{org}", get(orgs::get_org))
        // Runs
        .route("/orgs/{org}/runs", post(runs::create_run).get(runs::list_runs))
        .route(
            "/orgs/{org}/runs/{id}",
            get(runs::get_run).delete(runs::cancel_run),
        )
        .route("/orgs/{org}/runs/{id}/stages", get(runs::list_stage_runs))
        // Live events
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
