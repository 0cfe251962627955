//! Fixed-size pool of block workers draining the dispatch queue.
//!
//! Workers share one receiver; whichever is idle takes the next height, so
//! heights may complete out of order. A worker panic is escalated through
//! the fatal handler.

use super::worker::{BlockOutcome, BlockWorker};
use crate::model::BlockHeight;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

type SharedQueue = Arc<Mutex<mpsc::Receiver<BlockHeight>>>;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    abort: CancellationToken,
}

pub struct WorkerPoolParams {
    pub workers: usize,
    pub worker: BlockWorker,
    pub queue: mpsc::Receiver<BlockHeight>,
    pub telemetry: Arc<Telemetry>,
    pub fatal_handler: FatalErrorHandler,
    /// Stops workers from taking new heights.
    pub shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn launch(params: WorkerPoolParams) -> Self {
        let workers = params.workers.max(1);
        let queue: SharedQueue = Arc::new(Mutex::new(params.queue));
        let abort = CancellationToken::new();
        params.telemetry.record_worker_pool_size(workers);

        let handles = (0..workers)
            .map(|worker_id| {
                let worker = params.worker.clone();
                let queue = queue.clone();
                let shutdown = params.shutdown.clone();
                let abort = abort.clone();
                let fatal_handler = params.fatal_handler.clone();

                tokio::spawn(async move {
                    let result = std::panic::AssertUnwindSafe(run_worker(
                        worker_id, worker, queue, shutdown, abort,
                    ))
                    .catch_unwind()
                    .await;

                    if let Err(panic_payload) = result {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "worker task panicked"
                        );
                        let context = format!("worker {worker_id} panicked");
                        let panic_error = anyhow::anyhow!("worker {worker_id} panicked: {panic_msg}");
                        fatal_handler.trigger_external(context.as_str(), panic_error);
                    }
                })
            })
            .collect();

        tracing::info!(workers, "worker pool started");
        Self { handles, abort }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits for workers to finish their current height, up to `grace`, then
    /// aborts the rest. Returns `true` when every worker drained in time.
    pub async fn join(self, grace: Duration) -> bool {
        let aborts: Vec<AbortHandle> = self.handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(grace, join_all(self.handles)).await {
            Ok(_) => {
                tracing::info!("worker pool drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "workers still busy after grace period; aborting"
                );
                self.abort.cancel();
                for handle in aborts {
                    handle.abort();
                }
                false
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    worker: BlockWorker,
    queue: SharedQueue,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            height = async {
                let mut receiver = queue.lock().await;
                receiver.recv().await
            } => height,
        };
        let Some(height) = next else {
            break;
        };

        match worker.process(height, &abort).await {
            BlockOutcome::Processed { .. } | BlockOutcome::Abandoned => {}
            BlockOutcome::Cancelled => break,
        }
    }

    tracing::debug!(worker = worker_id, "worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
