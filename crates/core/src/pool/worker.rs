//! Stage worker pool implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::{LEASES_LOST, QUEUE_LEASES, STAGE_DURATION, STAGE_EXECUTIONS};
use crate::queue::{DispatchQueue, Lease, QueueError};
use crate::stage::{StageError, StageHandler, StageKind, StageRegistration};

use super::config::PoolConfig;
use super::types::{Activation, Disposition, PoolStatus, StageLifecycle};

/// How long `stop` waits for in-flight executions to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Tracks statistics for a pool.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Everything one execution needs, shared between the poll loop and the
/// spawned executions.
struct Shared {
    stage: StageKind,
    queue_name: String,
    handler: Arc<dyn StageHandler>,
    queue: Arc<dyn DispatchQueue>,
    lifecycle: Arc<dyn StageLifecycle>,
    lease_ttl: Duration,
    poll_interval: Duration,
    stats: PoolStats,
}

/// A bounded set of executors for one stage.
///
/// The poll loop takes a permit before it leases, so at most `concurrency`
/// leases are held by this pool at any time.
pub struct StagePool {
    shared: Arc<Shared>,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl StagePool {
    pub fn new(
        registration: &StageRegistration,
        queue: Arc<dyn DispatchQueue>,
        lifecycle: Arc<dyn StageLifecycle>,
        config: &PoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let concurrency = registration.concurrency.max(1);

        Self {
            shared: Arc::new(Shared {
                stage: registration.stage,
                queue_name: registration.queue.clone(),
                handler: Arc::clone(&registration.handler),
                queue,
                lifecycle,
                lease_ttl: config.lease_ttl(),
                poll_interval: config.poll_interval(),
                stats: PoolStats::default(),
            }),
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            poll_task: Mutex::new(None),
        }
    }

    pub fn stage(&self) -> StageKind {
        self.shared.stage
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the poll loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(stage = %self.shared.stage, "Pool already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let semaphore = Arc::clone(&self.semaphore);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(poll_loop(shared, semaphore, shutdown_rx));
        *self.poll_task.lock().await = Some(handle);

        info!(
            stage = %self.shared.stage,
            queue = %self.shared.queue_name,
            concurrency = self.concurrency,
            "Stage pool started"
        );
    }

    /// Stop polling and wait for in-flight executions to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.poll_task.lock().await.take() {
            if let Err(e) = handle.await {
                error!(stage = %self.shared.stage, error = %e, "Poll loop ended abnormally");
            }
        }

        // Every permit back means nothing is executing.
        let drained = tokio::time::timeout(
            DRAIN_TIMEOUT,
            self.semaphore.acquire_many(self.concurrency as u32),
        )
        .await;
        match drained {
            Ok(Ok(permits)) => drop(permits),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                stage = %self.shared.stage,
                active = self.shared.stats.active.load(Ordering::Relaxed),
                "Executions still running after drain timeout, leases will expire"
            ),
        }

        info!(stage = %self.shared.stage, "Stage pool stopped");
    }

    pub fn status(&self) -> PoolStatus {
        let stats = &self.shared.stats;
        PoolStatus {
            stage: self.shared.stage,
            queue: self.shared.queue_name.clone(),
            running: self.is_running(),
            active: stats.active.load(Ordering::Relaxed) as usize,
            max_concurrency: self.concurrency,
            processed: stats.processed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
        }
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_rx.recv() => break,
        };

        match shared.queue.lease(&shared.queue_name, shared.lease_ttl) {
            Ok(Some(lease)) => {
                QUEUE_LEASES
                    .with_label_values(&[shared.queue_name.as_str()])
                    .inc();
                debug!(
                    stage = %shared.stage,
                    work_item_id = %lease.job_key,
                    attempts = lease.attempts,
                    "Leased job"
                );
                tokio::spawn(execute(Arc::clone(&shared), lease, permit));
                continue;
            }
            Ok(None) => drop(permit),
            Err(e) => {
                drop(permit);
                error!(stage = %shared.stage, error = %e, "Failed to lease from queue");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.poll_interval) => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    debug!(stage = %shared.stage, "Poll loop exited");
}

/// Run one leased job through the lifecycle. The permit is held until the
/// job has been acked, forwarded or released.
async fn execute(shared: Arc<Shared>, lease: Lease, _permit: OwnedSemaphorePermit) {
    let stats = &shared.stats;
    stats.active.fetch_add(1, Ordering::Relaxed);

    let succeeded = run_lease(&shared, &lease).await;
    if succeeded {
        stats.processed.fetch_add(1, Ordering::Relaxed);
    } else {
        stats.failed.fetch_add(1, Ordering::Relaxed);
    }

    stats.active.fetch_sub(1, Ordering::Relaxed);
}

async fn run_lease(shared: &Arc<Shared>, lease: &Lease) -> bool {
    let stage = shared.stage.as_str();

    let ctx = match shared.lifecycle.on_active(lease).await {
        Ok(Activation::Run(ctx)) => Arc::new(ctx),
        Ok(Activation::Settle(disposition)) => {
            settle_lease(shared, lease, disposition);
            return true;
        }
        Err(StageError::Transient(reason)) => {
            STAGE_EXECUTIONS.with_label_values(&[stage, "transient"]).inc();
            warn!(
                stage,
                work_item_id = %lease.job_key,
                error = %reason,
                "Failed to activate stage, releasing for redelivery"
            );
            if let Err(e) = shared.queue.release(lease, shared.poll_interval) {
                lease_error(shared, lease, "release", e);
            }
            return false;
        }
        Err(e) => {
            STAGE_EXECUTIONS.with_label_values(&[stage, e.kind()]).inc();
            shared.lifecycle.on_failed(lease, &e).await;
            settle_lease(shared, lease, Disposition::Ack);
            return false;
        }
    };

    let heartbeat = spawn_heartbeat(shared, lease);
    let started = Instant::now();

    let handler = Arc::clone(&shared.handler);
    let task_ctx = Arc::clone(&ctx);
    let joined = tokio::spawn(async move { handler.run(&task_ctx).await }).await;

    STAGE_DURATION
        .with_label_values(&[stage])
        .observe(started.elapsed().as_secs_f64());

    let (result, panicked) = match joined {
        Ok(result) => (result, false),
        Err(e) => {
            STAGE_EXECUTIONS.with_label_values(&[stage, "panic"]).inc();
            error!(stage, work_item_id = %lease.job_key, error = %e, "Stage handler panicked");
            (
                Err(StageError::Permanent(format!("{} handler crashed", stage))),
                true,
            )
        }
    };

    let succeeded = match result {
        Ok(output) => {
            STAGE_EXECUTIONS.with_label_values(&[stage, "success"]).inc();
            match shared.lifecycle.on_completed(&ctx, output).await {
                Ok(disposition) => {
                    settle_lease(shared, lease, disposition);
                    true
                }
                Err(e) => {
                    // Outputs and charges are keyed, so running the stage
                    // again is safe.
                    warn!(
                        stage,
                        work_item_id = %lease.job_key,
                        error = %e,
                        "Failed to record stage completion, releasing for redelivery"
                    );
                    if let Err(e) = shared.queue.release(lease, shared.poll_interval) {
                        lease_error(shared, lease, "release", e);
                    }
                    false
                }
            }
        }
        Err(e) => {
            if !panicked {
                STAGE_EXECUTIONS.with_label_values(&[stage, e.kind()]).inc();
            }
            shared.lifecycle.on_failed(lease, &e).await;
            settle_lease(shared, lease, Disposition::Ack);
            false
        }
    };

    heartbeat.abort();
    succeeded
}

/// Keep the lease alive while the handler runs.
fn spawn_heartbeat(shared: &Arc<Shared>, lease: &Lease) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    let lease = lease.clone();
    let every = (shared.lease_ttl / 3).max(Duration::from_millis(10));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match shared.queue.extend(&lease, shared.lease_ttl) {
                Ok(_) => {}
                Err(e) => {
                    lease_error(&shared, &lease, "extend", e);
                    break;
                }
            }
        }
    })
}

fn settle_lease(shared: &Shared, lease: &Lease, disposition: Disposition) {
    let result = match &disposition {
        Disposition::Ack => shared.queue.ack(lease),
        Disposition::Forward { queue, payload } => shared.queue.forward(lease, queue, payload),
    };

    if let Err(e) = result {
        let op = match disposition {
            Disposition::Ack => "ack",
            Disposition::Forward { .. } => "forward",
        };
        lease_error(shared, lease, op, e);
    }
}

fn lease_error(shared: &Shared, lease: &Lease, op: &str, err: QueueError) {
    match err {
        QueueError::LeaseLost(_) => {
            LEASES_LOST
                .with_label_values(&[shared.queue_name.as_str()])
                .inc();
            warn!(
                stage = %shared.stage,
                work_item_id = %lease.job_key,
                op,
                "Lease lost, another executor owns the job now"
            );
        }
        other => error!(
            stage = %shared.stage,
            work_item_id = %lease.job_key,
            op,
            error = %other,
            "Queue operation failed"
        ),
    }
}
