use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The lease expired and was taken over, or the job is gone.
    #[error("lease lost for job {0}")]
    LeaseLost(String),

    #[error("database error: {0}")]
    Database(String),
}

/// A job to put on a queue.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub queue: String,
    /// Deduplication key. At most one job per key exists at a time.
    pub job_key: String,
    pub payload: String,
    pub priority: i64,
    pub delay: Option<Duration>,
}

impl EnqueueRequest {
    pub fn new(
        queue: impl Into<String>,
        job_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            job_key: job_key.into(),
            payload: payload.into(),
            priority: 0,
            delay: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same key is already present; nothing was added.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed,
    /// An executor holds a live lease; the job was left in place.
    Leased,
    NotFound,
}

/// Exclusive, expiring claim on a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub job_key: String,
    pub queue: String,
    pub payload: String,
    /// Unique per grant; every lease operation checks it.
    pub owner: String,
    /// Deliveries of this job on this queue, including this one.
    pub attempts: u32,
    pub expires_at: DateTime<Utc>,
}

/// Trait for dispatch queue backends.
pub trait DispatchQueue: Send + Sync {
    fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, QueueError>;

    /// Lease the next available job on `queue`, highest priority first, then
    /// oldest. Returns `None` when nothing is deliverable.
    fn lease(&self, queue: &str, ttl: Duration) -> Result<Option<Lease>, QueueError>;

    /// Push the lease expiry `ttl` into the future.
    fn extend(&self, lease: &Lease, ttl: Duration) -> Result<Lease, QueueError>;

    /// Remove the job; processing is finished.
    fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Give the job back, deliverable again after `delay`.
    fn release(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError>;

    /// Move the job to `next_queue` with a new payload, keeping its key.
    fn forward(&self, lease: &Lease, next_queue: &str, payload: &str) -> Result<(), QueueError>;

    /// Remove a job that is not leased.
    fn remove(&self, job_key: &str) -> Result<RemoveOutcome, QueueError>;

    /// Jobs currently on `queue`, leased or not.
    fn depth(&self, queue: &str) -> Result<i64, QueueError>;
}
