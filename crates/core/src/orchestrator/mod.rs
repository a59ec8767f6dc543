//! Run orchestrator.
//!
//! Admits runs and drives them through their stages:
//! - **Admission**: synchronous, in [`Orchestrator::create_run`]. Nothing is
//!   persisted for a rejected request.
//! - **Execution**: one [`StagePool`](crate::pool::StagePool) per registered
//!   stage leases jobs from that stage's queue.
//! - **Chaining**: a finished pipeline stage re-targets the same work item and
//!   forwards its job to the next stage's queue (see [`RunLifecycle`]).

mod catalog;
mod config;
mod lifecycle;
mod runner;
mod types;

pub use catalog::{CatalogError, ToolCatalog};
pub use config::OrchestratorConfig;
pub use lifecycle::RunLifecycle;
pub use runner::{Orchestrator, Stores};
pub use types::{
    CancelOutcome, CreateRunRequest, DispatchPayload, OrchestratorError, OrchestratorStatus,
};
