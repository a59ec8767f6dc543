//! Run orchestrator implementation.
//!
//! Admission happens synchronously in [`Orchestrator::create_run`]:
//! validate, resolve inputs, check credits, persist, enqueue. Execution
//! happens in the stage pools, one per registered stage, started by
//! [`Orchestrator::start`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::OrganizationSeed;
use crate::content::{
    mime_type_for_url, Content, ContentStore, CreateContentRequest, SqliteContentStore,
};
use crate::credits::{CreditLedger, Organization, SqliteCreditLedger};
use crate::metrics::{RUNS_CREATED, RUNS_REJECTED};
use crate::pool::{PoolConfig, StageLifecycle, StagePool};
use crate::publisher::{PublisherHandle, RunEvent};
use crate::queue::{DispatchQueue, EnqueueOutcome, EnqueueRequest, RemoveOutcome, SqliteDispatchQueue};
use crate::retry::RetryPolicy;
use crate::stage::{Metering, StageKind, StageRegistry, StageServices};
use crate::work::{
    CreateWorkItemRequest, RunKind, SqliteWorkItemStore, StageRun, WorkItem, WorkItemError,
    WorkItemFilter, WorkItemStatus, WorkItemStore,
};

use super::catalog::ToolCatalog;
use super::config::OrchestratorConfig;
use super::lifecycle::RunLifecycle;
use super::types::{
    CancelOutcome, CreateRunRequest, DispatchPayload, OrchestratorError, OrchestratorStatus,
};

/// The durable collaborators an orchestrator runs against.
#[derive(Clone)]
pub struct Stores {
    pub work_items: Arc<dyn WorkItemStore>,
    pub contents: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub queue: Arc<dyn DispatchQueue>,
}

impl Stores {
    /// SQLite stores sharing one database file.
    pub fn sqlite(path: &Path) -> Result<Self, OrchestratorError> {
        Ok(Self {
            work_items: Arc::new(SqliteWorkItemStore::new(path)?),
            contents: Arc::new(SqliteContentStore::new(path)?),
            ledger: Arc::new(SqliteCreditLedger::new(path)?),
            queue: Arc::new(SqliteDispatchQueue::new(path)?),
        })
    }

    pub fn in_memory() -> Result<Self, OrchestratorError> {
        Ok(Self {
            work_items: Arc::new(SqliteWorkItemStore::in_memory()?),
            contents: Arc::new(SqliteContentStore::in_memory()?),
            ledger: Arc::new(SqliteCreditLedger::in_memory()?),
            queue: Arc::new(SqliteDispatchQueue::in_memory()?),
        })
    }
}

/// Stages a validated request resolves to.
struct RunPlan {
    kind: RunKind,
    stages: Vec<StageKind>,
}

/// Admits runs and owns the stage pools that execute them.
pub struct Orchestrator {
    config: OrchestratorConfig,
    stores: Stores,
    catalog: ToolCatalog,
    publisher: PublisherHandle,
    lifecycle: Arc<RunLifecycle>,
    pools: Vec<StagePool>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator. Fails when a tool reaches a stage with no
    /// registered handler.
    pub fn new(
        config: OrchestratorConfig,
        pool_config: &PoolConfig,
        retry: RetryPolicy,
        stores: Stores,
        registry: StageRegistry,
        catalog: ToolCatalog,
        publisher: PublisherHandle,
    ) -> Result<Self, OrchestratorError> {
        catalog.validate(&registry)?;

        let services = StageServices {
            work_items: Arc::clone(&stores.work_items),
            contents: Arc::clone(&stores.contents),
            ledger: Arc::clone(&stores.ledger),
            publisher: publisher.clone(),
            retry,
            metering: Metering::from(&config),
        };
        let lifecycle = Arc::new(RunLifecycle::new(services));

        let pools = registry
            .registrations()
            .into_iter()
            .map(|registration| {
                StagePool::new(
                    registration,
                    Arc::clone(&stores.queue),
                    Arc::clone(&lifecycle) as Arc<dyn StageLifecycle>,
                    pool_config,
                )
            })
            .collect();

        Ok(Self {
            config,
            stores,
            catalog,
            publisher,
            lifecycle,
            pools,
            running: AtomicBool::new(false),
        })
    }

    /// Start every stage pool.
    pub async fn start(&self) {
        if !self.config.enabled {
            info!("Orchestrator disabled, runs will be queued but not executed");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(pools = self.pools.len(), "Starting orchestrator");
        for pool in &self.pools {
            pool.start().await;
        }
    }

    /// Stop every stage pool, waiting for in-flight stages.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping orchestrator");
        for pool in &self.pools {
            pool.stop().await;
        }
        info!("Orchestrator stopped");
    }

    pub fn status(&self) -> OrchestratorStatus {
        let count = |status| {
            self.stores
                .work_items
                .count(&WorkItemFilter::new().with_status(status))
                .unwrap_or(0) as usize
        };

        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            queued_count: count(WorkItemStatus::Queued),
            processing_count: count(WorkItemStatus::Processing),
            pools: self.pools.iter().map(StagePool::status).collect(),
        }
    }

    /// Jobs waiting or running per stage queue.
    pub fn queue_depths(&self) -> Vec<(StageKind, i64)> {
        self.pools
            .iter()
            .map(|pool| {
                let depth = self
                    .stores
                    .queue
                    .depth(&pool.stage().queue_name())
                    .unwrap_or(0);
                (pool.stage(), depth)
            })
            .collect()
    }

    /// Create configured organizations that do not exist yet.
    pub fn seed_organizations(&self, seeds: &[OrganizationSeed]) -> Result<(), OrchestratorError> {
        for seed in seeds {
            if self
                .stores
                .ledger
                .ensure_organization(&seed.orgname, seed.plan, seed.credits)?
            {
                info!(orgname = %seed.orgname, plan = seed.plan.as_str(), credits = seed.credits, "Seeded organization");
            }
        }
        Ok(())
    }

    pub fn organization(&self, orgname: &str) -> Result<Organization, OrchestratorError> {
        self.stores
            .ledger
            .organization(orgname)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("organization {}", orgname)))
    }

    /// Admit a run: validate, resolve inputs, check credits, persist and
    /// enqueue its first stage.
    ///
    /// Nothing is written when validation, lookup or the credit check fails.
    pub fn create_run(
        &self,
        orgname: &str,
        request: CreateRunRequest,
    ) -> Result<WorkItem, OrchestratorError> {
        let result = self.admit(orgname, request);
        if let Err(e) = &result {
            RUNS_REJECTED.with_label_values(&[e.reason()]).inc();
            match e {
                OrchestratorError::InternalFailure(_) => {
                    error!(orgname, error = %e, "Failed to create run")
                }
                _ => info!(orgname, error = %e, "Run rejected"),
            }
        }
        result
    }

    fn admit(
        &self,
        orgname: &str,
        request: CreateRunRequest,
    ) -> Result<WorkItem, OrchestratorError> {
        let plan = self.plan(&request)?;
        validate_inputs(&request)?;
        self.organization(orgname)?;

        let existing = self.resolve_existing(orgname, &request.content_ids)?;

        let known_chars: usize = existing.iter().map(Content::text_len).sum::<usize>()
            + request.text.as_deref().map(|t| t.chars().count()).unwrap_or(0);
        let credits_cost = self.config.estimate_credits(known_chars);
        self.stores.ledger.check_credits(orgname, credits_cost)?;

        let mut inputs: Vec<String> = existing.into_iter().map(|c| c.id).collect();
        inputs.extend(self.create_inputs(orgname, &request)?);
        if inputs.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "request resolved to no input content".to_string(),
            ));
        }

        let first_stage = plan.stages[0];
        let item = self.stores.work_items.create(CreateWorkItemRequest {
            orgname: orgname.to_string(),
            kind: plan.kind,
            tool_id: request.tool_id.clone(),
            pipeline_id: request.pipeline_id.clone(),
            stages: plan.stages,
            inputs,
            credits_cost,
        })?;

        let payload = DispatchPayload {
            stage_index: 0,
            stage: first_stage,
        };
        let enqueued = self.stores.queue.enqueue(EnqueueRequest::new(
            first_stage.queue_name(),
            item.id.clone(),
            payload.encode(),
        ));
        match enqueued {
            Ok(EnqueueOutcome::Enqueued) => {}
            Ok(EnqueueOutcome::Duplicate) => {
                warn!(work_item_id = %item.id, "Work item already on a queue");
            }
            Err(e) => {
                let message = format!("failed to enqueue: {}", e);
                if let Err(fail_err) = self.stores.work_items.fail(&item.id, &message) {
                    error!(work_item_id = %item.id, error = %fail_err, "Failed to mark undispatched run as failed");
                }
                return Err(OrchestratorError::InternalFailure(message));
            }
        }

        RUNS_CREATED
            .with_label_values(&[&item.kind.as_str().to_ascii_lowercase()])
            .inc();
        info!(
            work_item_id = %item.id,
            orgname,
            kind = item.kind.as_str(),
            stage = %first_stage,
            stages = item.stages.len(),
            inputs = item.inputs.len(),
            credits_cost,
            "Run created"
        );
        self.publisher.emit(RunEvent::RunCreated {
            work_item: item.clone(),
        });

        Ok(item)
    }

    /// Resolve the request's kind and the stages it runs.
    fn plan(&self, request: &CreateRunRequest) -> Result<RunPlan, OrchestratorError> {
        let kind = match (request.kind, &request.tool_id, &request.pipeline_id) {
            (Some(kind), _, _) => kind,
            (None, Some(_), None) => RunKind::ToolRun,
            (None, None, Some(_)) => RunKind::PipelineRun,
            (None, _, _) => {
                return Err(OrchestratorError::InvalidInput(
                    "kind is required when both or neither of tool_id and pipeline_id are set"
                        .to_string(),
                ))
            }
        };

        match kind {
            RunKind::ToolRun => {
                let tool_id = request.tool_id.as_deref().ok_or_else(|| {
                    OrchestratorError::InvalidInput("TOOL_RUN requires tool_id".to_string())
                })?;
                if request.pipeline_id.is_some() {
                    return Err(OrchestratorError::InvalidInput(
                        "TOOL_RUN does not take a pipeline_id".to_string(),
                    ));
                }
                let stage = self
                    .catalog
                    .tool(tool_id)
                    .ok_or_else(|| OrchestratorError::NotFound(format!("tool {}", tool_id)))?;
                Ok(RunPlan {
                    kind,
                    stages: vec![stage],
                })
            }
            RunKind::PipelineRun => {
                let pipeline_id = request.pipeline_id.as_deref().ok_or_else(|| {
                    OrchestratorError::InvalidInput("PIPELINE_RUN requires pipeline_id".to_string())
                })?;
                if request.tool_id.is_some() {
                    return Err(OrchestratorError::InvalidInput(
                        "PIPELINE_RUN does not take a tool_id".to_string(),
                    ));
                }
                let stages = self.catalog.pipeline(pipeline_id).ok_or_else(|| {
                    OrchestratorError::NotFound(format!("pipeline {}", pipeline_id))
                })?;
                Ok(RunPlan {
                    kind,
                    stages: stages.to_vec(),
                })
            }
        }
    }

    fn resolve_existing(
        &self,
        orgname: &str,
        ids: &[String],
    ) -> Result<Vec<Content>, OrchestratorError> {
        ids.iter()
            .map(|id| {
                self.stores
                    .contents
                    .get(orgname, id)?
                    .ok_or_else(|| OrchestratorError::NotFound(format!("content {}", id)))
            })
            .collect()
    }

    fn create_inputs(
        &self,
        orgname: &str,
        request: &CreateRunRequest,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut created = Vec::new();

        if let Some(text) = &request.text {
            let title = request.title.clone().unwrap_or_else(|| title_from_text(text));
            let content = self
                .stores
                .contents
                .create(CreateContentRequest::text(orgname, title, text.clone()))?;
            created.push(content.id);
        }

        if let Some(url) = &request.url {
            let title = request.title.clone().unwrap_or_else(|| url.clone());
            let content = self.stores.contents.create(CreateContentRequest::url(
                orgname,
                title,
                url.clone(),
                mime_type_for_url(url),
            ))?;
            created.push(content.id);
        }

        Ok(created)
    }

    /// Look up a run owned by `orgname`.
    pub fn get_run(&self, orgname: &str, id: &str) -> Result<WorkItem, OrchestratorError> {
        self.stores
            .work_items
            .find_for_org(orgname, id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {}", id)))
    }

    /// Runs of `orgname`, newest first, with the total matching `filter`.
    pub fn list_runs(
        &self,
        orgname: &str,
        filter: WorkItemFilter,
    ) -> Result<(Vec<WorkItem>, i64), OrchestratorError> {
        let filter = filter.with_orgname(orgname);
        let items = self.stores.work_items.list(&filter)?;
        let total = self.stores.work_items.count(&filter)?;
        Ok((items, total))
    }

    /// Runs matching `filter` across all organizations.
    pub fn count_runs(&self, filter: &WorkItemFilter) -> Result<i64, OrchestratorError> {
        Ok(self.stores.work_items.count(filter)?)
    }

    pub fn stage_runs(&self, orgname: &str, id: &str) -> Result<Vec<StageRun>, OrchestratorError> {
        let item = self.get_run(orgname, id)?;
        Ok(self.stores.work_items.stage_runs(&item.id)?)
    }

    /// Cancel a run.
    ///
    /// A run still waiting on its queue is removed and fails with
    /// `cancelled`. A run whose stage is executing cannot be interrupted: the
    /// request is recorded and enforced at the next stage boundary.
    /// Cancelling a finished run changes nothing.
    pub async fn cancel_run(
        &self,
        orgname: &str,
        id: &str,
    ) -> Result<CancelOutcome, OrchestratorError> {
        let item = self.get_run(orgname, id)?;
        if item.status.is_terminal() {
            return Ok(CancelOutcome {
                work_item: item,
                queue: RemoveOutcome::NotFound,
                cancelled: false,
            });
        }

        let removed = self.stores.queue.remove(&item.id)?;
        let cancelled = match removed {
            RemoveOutcome::Removed => {
                self.lifecycle.on_removed(&item.id).await;
                true
            }
            RemoveOutcome::Leased | RemoveOutcome::NotFound => {
                match self.stores.work_items.request_cancel(&item.id) {
                    Ok(item) => {
                        info!(
                            work_item_id = %item.id,
                            stage = %item.stage_name,
                            "Cancellation recorded, takes effect at the next stage boundary"
                        );
                        self.publisher.emit(RunEvent::RunCancelled {
                            orgname: item.orgname.clone(),
                            work_item_id: item.id.clone(),
                            removed_from_queue: false,
                        });
                    }
                    // Finished between the lookup and the request.
                    Err(WorkItemError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
                false
            }
        };

        Ok(CancelOutcome {
            work_item: self.get_run(orgname, id)?,
            queue: removed,
            cancelled,
        })
    }
}

fn validate_inputs(request: &CreateRunRequest) -> Result<(), OrchestratorError> {
    if !request.has_inputs() {
        return Err(OrchestratorError::InvalidInput(
            "one of content_ids, text or url is required".to_string(),
        ));
    }
    if request.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(OrchestratorError::InvalidInput("text is empty".to_string()));
    }
    if let Some(url) = &request.url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(OrchestratorError::InvalidInput(format!(
                "url must be http or https: {}",
                url
            )));
        }
    }
    if request.content_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(OrchestratorError::InvalidInput(
            "content_ids contains an empty id".to_string(),
        ));
    }
    Ok(())
}

/// First line of `text`, shortened to a title.
fn title_from_text(text: &str) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("Untitled");
    let mut title: String = line.chars().take(60).collect();
    if line.chars().count() > 60 {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_text() {
        assert_eq!(title_from_text("\n  hello world\nmore"), "hello world");
        assert_eq!(title_from_text("   "), "Untitled");
        let long = "x".repeat(80);
        assert_eq!(title_from_text(&long).chars().count(), 63);
    }

    #[test]
    fn test_validate_inputs() {
        assert!(validate_inputs(&CreateRunRequest::tool("summarize")).is_err());
        assert!(validate_inputs(&CreateRunRequest::tool("summarize").with_text(" ")).is_err());
        assert!(
            validate_inputs(&CreateRunRequest::tool("summarize").with_url("ftp://x/y")).is_err()
        );
        assert!(validate_inputs(&CreateRunRequest::tool("summarize").with_text("hi")).is_ok());
        assert!(validate_inputs(
            &CreateRunRequest::tool("summarize").with_url("https://example.com/a.pdf")
        )
        .is_ok());
    }
}
