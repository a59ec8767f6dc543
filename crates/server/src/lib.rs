//! HTTP and WebSocket surface of the conveyor run engine.

pub mod api;
pub mod metrics;
pub mod state;

pub use api::create_router;
pub use state::AppState;
