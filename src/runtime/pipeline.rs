//! Ingestion pipeline orchestration.
//!
//! `IngestPipeline` composes the focused modules for one run:
//! - the arrival scheduler, fed by the poll loop and the push pump, owns the
//!   bounded dispatch queue;
//! - the connection supervisor keeps the push subscription alive;
//! - the worker pool drains the queue into storage and the publisher;
//! - `lifecycle` owns the run token, fatal error capture, and metrics.

use super::config::IngestConfig;
use super::fatal::FatalErrorHandler;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::telemetry::Telemetry;
use crate::error::IngestError;
use crate::model::BlockHeight;
use crate::processor::backoff::{retry_with_policy, RetryCancelled, RetryPolicy};
use crate::processor::{BlockWorker, WorkerPool, WorkerPoolParams};
use crate::publisher::{EventPublisher, EventSink};
use crate::rpc::{ChainLink, ChainRpcClient};
use crate::scheduler::{dispatch_channel, spawn_poll_loop, spawn_push_pump, ArrivalScheduler};
use crate::storage::BlockStore;
use crate::subscription::{ConnectionState, ConnectionSupervisor, HeadSender};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const HEAD_CHANNEL_CAPACITY: usize = 16;

pub struct IngestPipeline {
    config: IngestConfig,
    chain: Arc<dyn ChainLink>,
    store: Arc<dyn BlockStore>,
    publisher: EventPublisher,
    telemetry: Arc<Telemetry>,
    shutdown_root: CancellationToken,
    run: Option<ActiveRun>,
}

struct ActiveRun {
    lifecycle: LifecycleHandles,
    scheduler: Arc<ArrivalScheduler>,
    supervisor: Option<Arc<ConnectionSupervisor>>,
    pool: WorkerPool,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Where dispatch resumes: above `watermark` when storage holds progress,
/// otherwise from `floor` (or the first observed height when neither is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResumePoint {
    watermark: Option<BlockHeight>,
    floor: Option<BlockHeight>,
}

impl ResumePoint {
    fn resolve(stored: Option<BlockHeight>, start_height: Option<BlockHeight>) -> Self {
        match (stored, start_height) {
            (Some(last), Some(start)) if start > last.next() => Self {
                watermark: None,
                floor: Some(start),
            },
            (Some(last), _) => Self {
                watermark: Some(last),
                floor: None,
            },
            (None, start) => Self {
                watermark: None,
                floor: start,
            },
        }
    }
}

impl IngestPipeline {
    /// Creates a pipeline with its own root cancellation token.
    pub fn new(
        config: IngestConfig,
        chain: Arc<dyn ChainLink>,
        store: Arc<dyn BlockStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_cancellation_token(config, chain, store, sink, CancellationToken::new())
    }

    /// Creates a pipeline whose runs derive their tokens from `shutdown_token`.
    pub fn with_cancellation_token(
        config: IngestConfig,
        chain: Arc<dyn ChainLink>,
        store: Arc<dyn BlockStore>,
        sink: Arc<dyn EventSink>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let publisher = EventPublisher::new(sink, config.subject(), config.publish_enabled());
        Self {
            config,
            chain,
            store,
            publisher,
            telemetry: Arc::new(Telemetry::default()),
            shutdown_root: shutdown_token,
            run: None,
        }
    }

    /// Builds the JSON-RPC chain client from `config` and wires the pipeline around it.
    pub fn connect(
        config: IngestConfig,
        store: Arc<dyn BlockStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let client = ChainRpcClient::with_options(
            config.rpc_url(),
            config.network(),
            config.rpc_options(),
        )
        .context("failed to build chain RPC client")?;
        Ok(Self::new(config, Arc::new(client), store, sink))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Highest height handed to the worker pool in the current run.
    pub fn watermark(&self) -> Option<BlockHeight> {
        self.run.as_ref().and_then(|run| run.scheduler.watermark())
    }

    /// State of the push subscription; `None` in polling mode or when idle.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.run
            .as_ref()
            .and_then(|run| run.supervisor.as_ref())
            .map(|supervisor| supervisor.state())
    }

    /// Replaces the root shutdown token used to derive per-run tokens.
    /// Only valid while the pipeline is idle.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            self.run.is_none(),
            "shutdown token should not change while the pipeline is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Resumes from stored progress and starts every task the configured mode needs.
    pub async fn start(&mut self) -> Result<()> {
        if self.run.is_some() {
            bail!("pipeline already running");
        }

        let stored = self
            .store
            .last_processed_height()
            .await
            .context("failed to read last processed height")?;
        let resume = ResumePoint::resolve(stored, self.config.start_height());
        let mode = self.config.mode();

        tracing::info!(
            mode = %mode,
            network = self.config.network(),
            workers = self.config.workers(),
            watermark = ?resume.watermark,
            start_height = ?resume.floor,
            "starting ingestion pipeline"
        );

        if let Err(err) = self
            .publisher
            .ensure_stream(self.config.stream_settings())
            .await
        {
            tracing::warn!(error = %err, "failed to configure outbound stream; events may be dropped");
        }

        let (queue_tx, queue_rx) = dispatch_channel(self.config.queue_capacity());
        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            queue: queue_tx.downgrade(),
            metrics_interval: self.config.metrics_interval(),
            stall_after: self.config.stall_after(),
        });
        let run_token = lifecycle.run_token.clone();
        let fatal_handler = lifecycle.fatal_handler();

        let scheduler = Arc::new(
            ArrivalScheduler::new(
                mode,
                self.config.fallback_timeout(),
                resume.watermark,
                queue_tx,
                self.telemetry.clone(),
            )
            .with_start_height(resume.floor)
            .with_max_gap_fill(self.config.max_gap_fill()),
        );

        let worker = BlockWorker::new(
            self.chain.clone(),
            self.store.clone(),
            self.publisher.clone(),
            self.telemetry.clone(),
            self.config.worker_settings(),
        );
        let pool = WorkerPool::launch(WorkerPoolParams {
            workers: self.config.workers(),
            worker,
            queue: queue_rx,
            telemetry: self.telemetry.clone(),
            fatal_handler: fatal_handler.clone(),
            shutdown: run_token.clone(),
        });

        let mut tasks = Vec::new();
        if mode.uses_polling() {
            tasks.push((
                "poll loop",
                spawn_poll_loop(
                    self.chain.clone(),
                    scheduler.clone(),
                    self.config.polling_interval(),
                    run_token.clone(),
                ),
            ));
        }

        let supervisor = if mode.uses_push() {
            let supervisor = Arc::new(ConnectionSupervisor::new(
                self.config.supervisor_config(),
                self.telemetry.clone(),
            ));
            let (heads_tx, heads_rx) = mpsc::channel(HEAD_CHANNEL_CAPACITY);
            tasks.push((
                "push pump",
                spawn_push_pump(heads_rx, scheduler.clone(), run_token.clone()),
            ));
            tasks.push((
                "push supervisor",
                spawn_push_supervisor(PushSupervisorParams {
                    supervisor: supervisor.clone(),
                    scheduler: scheduler.clone(),
                    heads: heads_tx,
                    policy: self.config.reconnect_policy(),
                    fatal_handler,
                    shutdown: run_token,
                }),
            ));
            Some(supervisor)
        } else {
            None
        };

        self.run = Some(ActiveRun {
            lifecycle,
            scheduler,
            supervisor,
            pool,
            tasks,
        });
        Ok(())
    }

    /// Stops accepting work, closes the subscription, and waits up to the
    /// configured grace period for in-flight blocks. Returns the fatal error
    /// that ended the run, if any.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };
        let ActiveRun {
            lifecycle,
            scheduler,
            supervisor,
            pool,
            tasks,
        } = run;

        tracing::info!("stopping ingestion pipeline");
        let grace = self.config.shutdown_grace();
        lifecycle.run_token.cancel();

        if let Some(supervisor) = &supervisor {
            supervisor.close().await;
        }
        for (name, handle) in tasks {
            join_task(name, handle, grace).await;
        }
        drop(scheduler);

        if !pool.join(grace).await {
            tracing::warn!("in-flight blocks abandoned at shutdown");
        }

        let fatal_error = lifecycle.error();
        lifecycle.shutdown().await;

        if let Some(err) = fatal_error {
            return Err(err).context("ingestion pipeline aborted");
        }
        tracing::info!("ingestion pipeline stopped");
        Ok(())
    }
}

async fn join_task(name: &'static str, handle: JoinHandle<()>, grace: Duration) {
    let abort = handle.abort_handle();
    match timeout(grace, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_cancelled() => {}
        Ok(Err(err)) => tracing::warn!(task = name, error = %err, "task terminated unexpectedly"),
        Err(_) => {
            tracing::warn!(task = name, "task did not stop within grace period; aborting");
            abort.abort();
        }
    }
}

struct PushSupervisorParams {
    supervisor: Arc<ConnectionSupervisor>,
    scheduler: Arc<ArrivalScheduler>,
    heads: HeadSender,
    policy: RetryPolicy,
    fatal_handler: FatalErrorHandler,
    shutdown: CancellationToken,
}

/// Opens the subscription with the reconnect budget, then keeps it alive.
/// Exhaustion is routed through the scheduler, which decides whether it is
/// fatal for the configured mode.
fn spawn_push_supervisor(params: PushSupervisorParams) -> JoinHandle<()> {
    let PushSupervisorParams {
        supervisor,
        scheduler,
        heads,
        policy,
        fatal_handler,
        shutdown,
    } = params;

    tokio::spawn(async move {
        let outcome = drive_subscription(&supervisor, heads, policy, &shutdown).await;
        if let Err(err) = outcome {
            supervisor.close().await;
            if let Err(err) = scheduler.on_push_exhausted(err) {
                fatal_handler.trigger(err);
            }
        }
        tracing::info!("push supervisor stopped");
    })
}

async fn drive_subscription(
    supervisor: &ConnectionSupervisor,
    heads: HeadSender,
    policy: RetryPolicy,
    shutdown: &CancellationToken,
) -> Result<(), IngestError> {
    let opened = retry_with_policy(
        policy,
        Some(shutdown),
        move |_| async move { supervisor.open().await.map_err(anyhow::Error::from) },
        |attempt, delay, err, will_retry| {
            if will_retry {
                tracing::warn!(
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "failed to open push subscription; backing off"
                );
            } else {
                tracing::error!(attempt, error = %err, "push subscription could not be opened");
            }
        },
    )
    .await;

    match opened {
        Ok(()) => {}
        Err(err) if err.downcast_ref::<RetryCancelled>().is_some() => return Ok(()),
        Err(_) => {
            return Err(IngestError::ConnectionExhausted {
                attempts: policy.max_attempts,
            })
        }
    }

    tracing::info!(
        subscription = ?supervisor.subscription_id(),
        "push subscription live"
    );
    supervisor.subscribe(heads)?;
    supervisor.run(shutdown.clone()).await
}
