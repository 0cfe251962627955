use crate::model::BlockHeight;
use crate::subscription::ConnectionState;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc::WeakSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Default window after which dispatched-but-unprocessed work counts as a stall.
pub const DEFAULT_STALL_AFTER: Duration = Duration::from_secs(120);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling health derived from counters and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Stalled,
}

/// Counters and health state shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct Telemetry {
    blocks_dispatched: AtomicU64,
    blocks_attempted: AtomicU64,
    blocks_processed: AtomicU64,
    block_failures: AtomicU64,
    consecutive_block_failures: AtomicU64,
    fetch_retries: AtomicU64,
    persist_failures: AtomicU64,
    transactions_written: AtomicU64,
    transactions_failed: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    push_arrivals: AtomicU64,
    poll_arrivals: AtomicU64,
    suppressed_arrivals: AtomicU64,
    duplicate_arrivals: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnects: AtomicU64,
    connection_state: AtomicU8,
    push_required: AtomicBool,
    worker_pool_size: AtomicUsize,
    highest_processed: AtomicU64,
    last_dispatch_at: Mutex<Option<Instant>>,
    last_success_at: Mutex<Option<Instant>>,
}

impl Telemetry {
    pub fn record_dispatched(&self, height: BlockHeight) {
        self.blocks_dispatched.fetch_add(1, Ordering::Relaxed);
        *self.last_dispatch_at.lock().expect("telemetry mutex poisoned") = Some(Instant::now());
        tracing::trace!(height = %height, "block dispatched");
    }

    pub fn record_block_attempt(&self) {
        self.blocks_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_processed(&self, height: BlockHeight) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_block_failures.store(0, Ordering::Relaxed);
        self.highest_processed
            .fetch_max(height.get(), Ordering::Relaxed);
        *self.last_success_at.lock().expect("telemetry mutex poisoned") = Some(Instant::now());
    }

    /// Terminal failure for one block: fetch exhausted or nothing could be written.
    pub fn record_block_failure(&self) {
        self.block_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_block_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transactions_written(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.transactions_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_transactions_failed(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.transactions_failed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_published(&self, count: usize) {
        self.events_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_publish_failures(&self, count: usize) {
        self.publish_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_push_arrival(&self) {
        self.push_arrivals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_arrival(&self) {
        self.poll_arrivals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed_arrivals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_arrivals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_state(&self, state: ConnectionState) {
        self.connection_state
            .store(state.as_u8(), Ordering::Relaxed);
    }

    /// Marks whether block arrivals depend on the push channel being live.
    pub fn set_push_required(&self, required: bool) {
        self.push_required.store(required, Ordering::Relaxed);
    }

    pub fn record_worker_pool_size(&self, workers: usize) {
        self.worker_pool_size.store(workers, Ordering::Relaxed);
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection_state.load(Ordering::Relaxed))
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Highest height whose block completed processing, if any.
    pub fn highest_processed(&self) -> Option<BlockHeight> {
        if self.blocks_processed() == 0 {
            return None;
        }
        Some(BlockHeight::new(self.highest_processed.load(Ordering::Relaxed)))
    }

    pub fn health(&self, stall_after: Duration) -> HealthStatus {
        let connection = self.connection_state();
        let push_required = self.push_required.load(Ordering::Relaxed);

        if push_required && connection == ConnectionState::Stopped {
            return HealthStatus::Stalled;
        }

        let last_dispatch = *self.last_dispatch_at.lock().expect("telemetry mutex poisoned");
        let last_success = *self.last_success_at.lock().expect("telemetry mutex poisoned");
        if let Some(dispatched_at) = last_dispatch {
            let waiting_since = match last_success {
                Some(success_at) if success_at >= dispatched_at => None,
                Some(success_at) => Some(success_at),
                None => Some(dispatched_at),
            };
            if waiting_since.is_some_and(|since| since.elapsed() >= stall_after) {
                return HealthStatus::Stalled;
            }
        }

        if self.consecutive_block_failures.load(Ordering::Relaxed) > 0 {
            return HealthStatus::Degraded;
        }
        if push_required && connection != ConnectionState::Live {
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            blocks_dispatched: self.blocks_dispatched.load(Ordering::Relaxed),
            blocks_attempted: self.blocks_attempted.load(Ordering::Relaxed),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            block_failures: self.block_failures.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            transactions_written: self.transactions_written.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            push_arrivals: self.push_arrivals.load(Ordering::Relaxed),
            poll_arrivals: self.poll_arrivals.load(Ordering::Relaxed),
            suppressed_arrivals: self.suppressed_arrivals.load(Ordering::Relaxed),
            duplicate_arrivals: self.duplicate_arrivals.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub blocks_dispatched: u64,
    pub blocks_attempted: u64,
    pub blocks_processed: u64,
    pub block_failures: u64,
    pub fetch_retries: u64,
    pub persist_failures: u64,
    pub transactions_written: u64,
    pub transactions_failed: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub push_arrivals: u64,
    pub poll_arrivals: u64,
    pub suppressed_arrivals: u64,
    pub duplicate_arrivals: u64,
    pub reconnect_attempts: u64,
    pub reconnects: u64,
}

/// Spawns a background task that periodically logs throughput, queue depth, and failures.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    queue: WeakSender<BlockHeight>,
    shutdown: CancellationToken,
    interval: Duration,
    stall_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "blockrelay::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let processed_delta = current
                        .blocks_processed
                        .saturating_sub(last_snapshot.blocks_processed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };
                    let queue_depth = queue
                        .upgrade()
                        .map(|sender| sender.max_capacity() - sender.capacity())
                        .unwrap_or(0);

                    tracing::info!(
                        target: "blockrelay::metrics",
                        throughput = format!("{throughput:.2}"),
                        processed = current.blocks_processed,
                        dispatched = current.blocks_dispatched,
                        failed = current.block_failures,
                        queue_depth,
                        transactions = current.transactions_written,
                        published = current.events_published,
                        publish_failures = current.publish_failures,
                        suppressed = current.suppressed_arrivals,
                        reconnect_attempts = current.reconnect_attempts,
                        connection = ?telemetry.connection_state(),
                        health = ?telemetry.health(stall_after),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
