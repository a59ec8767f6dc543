//! Work item state changes driven by the worker pools.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::content::Content;
use crate::metrics::RUNS_FINISHED;
use crate::pool::{Activation, Disposition, StageLifecycle};
use crate::publisher::RunEvent;
use crate::queue::Lease;
use crate::stage::{StageContext, StageError, StageOutput, StageServices};
use crate::work::{WorkItem, WorkItemError, WorkItemStatus};

use super::types::DispatchPayload;

pub(crate) const CANCELLED: &str = "cancelled";

/// Applies the work item state machine around stage executions and chains
/// pipeline stages.
///
/// A completed stage that has a successor re-targets the same work item and
/// forwards its queue job, so the run keeps one identity throughout.
/// Cancellation requests recorded mid-stage take effect at the next stage
/// boundary.
pub struct RunLifecycle {
    services: StageServices,
}

impl RunLifecycle {
    pub fn new(services: StageServices) -> Self {
        Self { services }
    }

    fn load(&self, id: &str) -> Result<WorkItem, StageError> {
        self.services
            .work_items
            .get(id)?
            .ok_or_else(|| StageError::Permanent(format!("work item {} not found", id)))
    }

    fn resolve_inputs(&self, item: &WorkItem, ids: &[String]) -> Result<Vec<Content>, StageError> {
        ids.iter()
            .map(|id| {
                self.services.contents.get(&item.orgname, id)?.ok_or_else(|| {
                    StageError::Permanent(format!("input content {} no longer exists", id))
                })
            })
            .collect()
    }

    fn emit_update(&self, item: &WorkItem) {
        self.services.publisher.emit(RunEvent::Update {
            work_item: item.clone(),
        });
    }

    fn emit_cancelled(&self, item: &WorkItem, removed_from_queue: bool) {
        self.services.publisher.emit(RunEvent::RunCancelled {
            orgname: item.orgname.clone(),
            work_item_id: item.id.clone(),
            removed_from_queue,
        });
    }

    /// Move an item to ERROR and announce it. Items that are already
    /// terminal are left alone.
    fn fail_item(&self, id: &str, stage_index: Option<usize>, message: &str) -> Option<WorkItem> {
        if let Some(index) = stage_index {
            if let Err(e) = self.services.work_items.fail_stage_run(id, index, message) {
                warn!(work_item_id = %id, error = %e, "Failed to record stage failure");
            }
        }

        match self.services.work_items.fail(id, message) {
            Ok(item) => {
                let status = if message == CANCELLED { CANCELLED } else { "error" };
                RUNS_FINISHED.with_label_values(&[status]).inc();
                self.emit_update(&item);
                Some(item)
            }
            Err(WorkItemError::InvalidTransition { from, .. }) => {
                debug!(work_item_id = %id, status = %from, "Work item already terminal");
                None
            }
            Err(e) => {
                error!(work_item_id = %id, error = %e, "Failed to mark work item as failed");
                None
            }
        }
    }

    /// The stage after `ctx` finished. Either forwards the job or, when the
    /// run was cancelled meanwhile, ends it.
    fn chain(
        &self,
        ctx: &StageContext,
        item: WorkItem,
        output: &StageOutput,
        next_index: usize,
    ) -> Result<Disposition, StageError> {
        if item.cancel_requested {
            info!(
                work_item_id = %item.id,
                stage = %ctx.stage,
                "Run cancelled, not chaining to the next stage"
            );
            if let Some(item) = self.fail_item(&item.id, None, CANCELLED) {
                self.emit_cancelled(&item, false);
            }
            return Ok(Disposition::Ack);
        }

        // Stages that produce nothing pass their inputs along.
        let next_inputs: Vec<String> = match &output.next_inputs {
            Some(ids) => ids.clone(),
            None if output.outputs.is_empty() => {
                ctx.inputs.iter().map(|c| c.id.clone()).collect()
            }
            None => output.outputs.clone(),
        };

        let item = self
            .services
            .work_items
            .advance_stage(&item.id, next_index, &next_inputs)?;
        let payload = DispatchPayload {
            stage_index: item.stage_index,
            stage: item.stage_name,
        };

        info!(
            work_item_id = %item.id,
            from = %ctx.stage,
            to = %item.stage_name,
            stage_index = item.stage_index,
            "Chaining to next stage"
        );
        self.services.publisher.emit(RunEvent::StageAdvanced {
            orgname: item.orgname.clone(),
            work_item_id: item.id.clone(),
            stage_index: item.stage_index,
            stage: item.stage_name,
        });

        Ok(Disposition::Forward {
            queue: item.stage_name.queue_name(),
            payload: payload.encode(),
        })
    }
}

#[async_trait]
impl StageLifecycle for RunLifecycle {
    async fn on_active(&self, lease: &Lease) -> Result<Activation, StageError> {
        let payload = DispatchPayload::decode(&lease.payload)
            .map_err(|e| StageError::Permanent(format!("malformed dispatch payload: {}", e)))?;
        let item = self.load(&lease.job_key)?;

        if item.status.is_terminal() {
            debug!(work_item_id = %item.id, status = %item.status, "Dropping job of finished run");
            return Ok(Activation::Settle(Disposition::Ack));
        }

        if payload.stage_index < item.stage_index {
            // Chained in the store, but the job never moved.
            info!(
                work_item_id = %item.id,
                stage = %item.stage_name,
                "Resuming interrupted stage chain"
            );
            let resumed = DispatchPayload {
                stage_index: item.stage_index,
                stage: item.stage_name,
            };
            return Ok(Activation::Settle(Disposition::Forward {
                queue: item.stage_name.queue_name(),
                payload: resumed.encode(),
            }));
        }
        if payload.stage_index > item.stage_index {
            return Err(StageError::Permanent(format!(
                "job targets stage {} but work item is at stage {}",
                payload.stage_index, item.stage_index
            )));
        }

        if item.cancel_requested {
            return Err(StageError::Cancelled);
        }

        let was_queued = item.status == WorkItemStatus::Queued;
        let item = self.services.work_items.mark_processing(&item.id)?;
        if was_queued {
            info!(work_item_id = %item.id, orgname = %item.orgname, "Run started");
            self.emit_update(&item);
        }

        let stage_run = self
            .services
            .work_items
            .begin_stage_run(&item.id, item.stage_index)?;
        if stage_run.attempts > 1 {
            warn!(
                work_item_id = %item.id,
                stage = %item.stage_name,
                attempts = stage_run.attempts,
                "Stage redelivered"
            );
        }

        let inputs = self.resolve_inputs(&item, &stage_run.inputs)?;
        Ok(Activation::Run(StageContext::new(
            &self.services,
            item,
            inputs,
        )))
    }

    async fn on_completed(
        &self,
        ctx: &StageContext,
        output: StageOutput,
    ) -> Result<Disposition, StageError> {
        let id = ctx.work_item_id();
        self.services
            .work_items
            .complete_stage_run(id, ctx.stage_index, &output.outputs)?;
        let item = self.services.work_items.attach_outputs(id, &output.outputs)?;

        debug!(
            work_item_id = %id,
            stage = %ctx.stage,
            outputs = output.outputs.len(),
            tokens = output.tokens_used,
            "Stage completed"
        );

        if let Some((next_index, _)) = item.next_stage() {
            return self.chain(ctx, item, &output, next_index);
        }

        let item = self.services.work_items.complete(id)?;
        RUNS_FINISHED.with_label_values(&["complete"]).inc();
        info!(
            work_item_id = %item.id,
            orgname = %item.orgname,
            credits_estimated = item.credits_cost,
            credits_settled = item.credits_used,
            "Run complete"
        );
        self.emit_update(&item);
        Ok(Disposition::Ack)
    }

    async fn on_failed(&self, lease: &Lease, error: &StageError) {
        let message = match error {
            StageError::Cancelled => CANCELLED.to_string(),
            other => other.to_string(),
        };
        let stage_index = DispatchPayload::decode(&lease.payload)
            .ok()
            .map(|p| p.stage_index);

        match error {
            StageError::Cancelled => {
                info!(work_item_id = %lease.job_key, "Run cancelled at stage boundary")
            }
            _ => error!(
                work_item_id = %lease.job_key,
                queue = %lease.queue,
                error = %message,
                "Stage failed"
            ),
        }

        if let Some(item) = self.fail_item(&lease.job_key, stage_index, &message) {
            if matches!(error, StageError::Cancelled) {
                self.emit_cancelled(&item, false);
            }
        }
    }

    async fn on_removed(&self, job_key: &str) {
        let stage_index = self
            .services
            .work_items
            .get(job_key)
            .ok()
            .flatten()
            .map(|item| item.stage_index);

        info!(work_item_id = %job_key, "Run removed from queue before dispatch");
        if let Some(item) = self.fail_item(job_key, stage_index, CANCELLED) {
            self.emit_cancelled(&item, true);
        }
    }
}
