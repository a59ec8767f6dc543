//! Everything a stage handler gets to see and touch while it runs.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::{StageError, StageKind};
use crate::content::{Content, ContentStore, CreateContentRequest};
use crate::credits::{credits_for_tokens, CreditError, CreditLedger};
use crate::metrics::CREDITS_DEBITED;
use crate::orchestrator::OrchestratorConfig;
use crate::publisher::{PublisherHandle, RunEvent};
use crate::retry::{RetryPolicy, Retryable};
use crate::work::{WorkItem, WorkItemStore};

/// Conversion rates between resource usage and credits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metering {
    pub tokens_per_credit: u64,
    pub chars_per_token: u64,
    pub image_credits: i64,
}

impl Default for Metering {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for Metering {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            tokens_per_credit: config.tokens_per_credit,
            chars_per_token: config.chars_per_token,
            image_credits: config.image_credits,
        }
    }
}

/// Shared collaborators used to build a [`StageContext`] per execution.
#[derive(Clone)]
pub struct StageServices {
    pub work_items: Arc<dyn WorkItemStore>,
    pub contents: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub publisher: PublisherHandle,
    pub retry: RetryPolicy,
    pub metering: Metering,
}

/// Per-execution view of a work item at one stage.
#[derive(Clone)]
pub struct StageContext {
    pub work_item: WorkItem,
    pub stage: StageKind,
    pub stage_index: usize,
    /// Resolved input content, in order.
    pub inputs: Vec<Content>,
    pub progress: ProgressReporter,
    pub credits: CreditMeter,
    pub metering: Metering,
    contents: Arc<dyn ContentStore>,
    retry: RetryPolicy,
}

impl StageContext {
    pub fn new(services: &StageServices, work_item: WorkItem, inputs: Vec<Content>) -> Self {
        let stage = work_item.stage_name;
        let stage_index = work_item.stage_index;
        let progress = ProgressReporter {
            work_item: work_item.clone(),
            stage,
            stage_index,
            local: Arc::new(AtomicU64::new(0f64.to_bits())),
            work_items: Arc::clone(&services.work_items),
            publisher: services.publisher.clone(),
        };
        let credits = CreditMeter {
            ledger: Arc::clone(&services.ledger),
            work_items: Arc::clone(&services.work_items),
            orgname: work_item.orgname.clone(),
            work_item_id: work_item.id.clone(),
            stage,
            stage_index,
            metering: services.metering,
        };

        Self {
            work_item,
            stage,
            stage_index,
            inputs,
            progress,
            credits,
            metering: services.metering,
            contents: Arc::clone(&services.contents),
            retry: services.retry.clone(),
        }
    }

    pub fn orgname(&self) -> &str {
        &self.work_item.orgname
    }

    pub fn work_item_id(&self) -> &str {
        &self.work_item.id
    }

    /// Run one external call under the retry policy.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.retry.run(operation, op).await
    }

    /// Create an output, reusing one an earlier delivery already created
    /// under the same key.
    pub fn create_output(
        &self,
        output_key: &str,
        request: CreateContentRequest,
    ) -> Result<Content, StageError> {
        Ok(self
            .contents
            .create_output(&self.work_item.id, output_key, request)?)
    }

    pub fn set_preview(&self, content_id: &str, url: &str) -> Result<(), StageError> {
        Ok(self.contents.set_preview(content_id, url)?)
    }
}

/// Reports stage-local progress and maps it onto the run.
///
/// Local progress is kept as `f64` bits in an atomic so concurrent sub-tasks
/// can add to it without a lock. The stored value only ever goes up.
#[derive(Clone)]
pub struct ProgressReporter {
    work_item: WorkItem,
    stage: StageKind,
    stage_index: usize,
    local: Arc<AtomicU64>,
    work_items: Arc<dyn WorkItemStore>,
    publisher: PublisherHandle,
}

impl ProgressReporter {
    /// Current stage-local progress.
    pub fn local(&self) -> f64 {
        f64::from_bits(self.local.load(Ordering::SeqCst))
    }

    /// Raise stage-local progress to at least `value`.
    pub fn set(&self, value: f64) -> Result<f64, StageError> {
        let local = self.update(|current| current.max(value));
        self.store(local)
    }

    /// Add `delta` to stage-local progress. Concurrent calls commute.
    pub fn add(&self, delta: f64) -> Result<f64, StageError> {
        let local = self.update(|current| current + delta);
        self.store(local)
    }

    fn update(&self, f: impl Fn(f64) -> f64) -> f64 {
        let mut current = self.local.load(Ordering::SeqCst);
        loop {
            let next = f(f64::from_bits(current)).clamp(0.0, 1.0);
            match self.local.compare_exchange(
                current,
                next.to_bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    fn store(&self, local: f64) -> Result<f64, StageError> {
        let overall = self.work_item.overall_progress(self.stage_index, local);
        let stored = self
            .work_items
            .advance_progress(&self.work_item.id, overall)?;

        self.publisher.emit(RunEvent::UpdateProgress {
            orgname: self.work_item.orgname.clone(),
            work_item_id: self.work_item.id.clone(),
            stage: self.stage,
            progress: stored,
        });
        Ok(stored)
    }
}

/// Admission checks and idempotent settlement for one stage execution.
#[derive(Clone)]
pub struct CreditMeter {
    ledger: Arc<dyn CreditLedger>,
    work_items: Arc<dyn WorkItemStore>,
    orgname: String,
    work_item_id: String,
    stage: StageKind,
    stage_index: usize,
    metering: Metering,
}

impl CreditMeter {
    pub fn credits_for_tokens(&self, tokens: u64) -> i64 {
        credits_for_tokens(tokens, self.metering.tokens_per_credit)
    }

    /// Fail permanently if the organization cannot cover `tokens`.
    pub fn check_tokens(&self, tokens: u64) -> Result<(), StageError> {
        let required = self.credits_for_tokens(tokens);
        match self.ledger.check_credits(&self.orgname, required) {
            Ok(()) => Ok(()),
            Err(CreditError::InsufficientCredits { required, available, .. }) => {
                Err(StageError::Permanent(format!(
                    "not enough credits to process this content: required {}, available {}",
                    required, available
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Settle `tokens` under `key`. Returns the credits debited, zero when
    /// this key was already settled for the work item.
    pub fn charge_tokens(&self, key: &str, tokens: u64) -> Result<i64, StageError> {
        self.charge_credits(key, self.credits_for_tokens(tokens))
    }

    /// Settle a fixed amount under `key`.
    pub fn charge_credits(&self, key: &str, credits: i64) -> Result<i64, StageError> {
        if credits <= 0 {
            return Ok(0);
        }

        let charge_key = format!("stage:{}:{}:{}", self.stage_index, self.stage, key);
        let applied = self.ledger.debit_once(
            &self.orgname,
            &self.work_item_id,
            &charge_key,
            credits,
        )?;

        match applied {
            Some(balance) => {
                self.work_items
                    .add_credits_used(&self.work_item_id, self.stage_index, credits)?;
                CREDITS_DEBITED
                    .with_label_values(&[self.stage.as_str()])
                    .inc_by(credits as u64);
                debug!(
                    work_item_id = %self.work_item_id,
                    charge_key = %charge_key,
                    credits,
                    balance,
                    "Settled credits"
                );
                Ok(credits)
            }
            None => {
                debug!(
                    work_item_id = %self.work_item_id,
                    charge_key = %charge_key,
                    "Charge already settled, skipping"
                );
                Ok(0)
            }
        }
    }
}
