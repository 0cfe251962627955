//! Arrival scheduler: merges push and poll observations into one deduplicated
//! stream of heights on the bounded dispatch queue.

pub mod mode;
pub mod poller;

pub use mode::{decide, ArrivalSource, ArrivalState, Decision, SchedulerMode};
pub use poller::{spawn_poll_loop, spawn_push_pump};

use crate::error::IngestError;
use crate::model::BlockHeight;
use crate::runtime::telemetry::Telemetry;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Producer side of the dispatch queue drained by the worker pool.
pub type DispatchSender = mpsc::Sender<BlockHeight>;
pub type DispatchReceiver = mpsc::Receiver<BlockHeight>;

pub fn dispatch_channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    mpsc::channel(capacity.max(1))
}

pub struct ArrivalScheduler {
    mode: SchedulerMode,
    fallback_timeout: Duration,
    state: Mutex<ArrivalState>,
    queue: DispatchSender,
    telemetry: Arc<Telemetry>,
}

impl ArrivalScheduler {
    /// `watermark` is the highest height already durably handled, if known;
    /// only heights above it are ever dispatched.
    pub fn new(
        mode: SchedulerMode,
        fallback_timeout: Duration,
        watermark: Option<BlockHeight>,
        queue: DispatchSender,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        telemetry.set_push_required(mode == SchedulerMode::Realtime);
        Self {
            mode,
            fallback_timeout,
            state: Mutex::new(ArrivalState::new(watermark, Instant::now())),
            queue,
            telemetry,
        }
    }

    /// Backfills from `start` on the first observation when no watermark was
    /// given; heights below it are dropped.
    pub fn with_start_height(self, start: Option<BlockHeight>) -> Self {
        {
            let mut state = self.lock_state();
            *state = state.with_floor(start);
        }
        self
    }

    /// Caps how many heights one arrival dispatches. A larger gap is worked
    /// off across later arrivals, so a bogus far-ahead height cannot flood
    /// the queue or pin the watermark.
    pub fn with_max_gap_fill(self, span: u64) -> Self {
        {
            let mut state = self.lock_state();
            *state = state.with_max_span(Some(span));
        }
        self
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn watermark(&self) -> Option<BlockHeight> {
        self.lock_state().watermark
    }

    /// Handles a height announced by the push subscription.
    pub async fn on_push(
        &self,
        height: BlockHeight,
        shutdown: &CancellationToken,
    ) -> Result<u64, IngestError> {
        self.telemetry.record_push_arrival();
        self.on_arrival(ArrivalSource::Push, height, shutdown).await
    }

    /// Handles the latest height observed by a poll tick.
    pub async fn on_poll(
        &self,
        height: BlockHeight,
        shutdown: &CancellationToken,
    ) -> Result<u64, IngestError> {
        self.telemetry.record_poll_arrival();
        self.on_arrival(ArrivalSource::Poll, height, shutdown).await
    }

    /// Decides what the push source's exhaustion means for this mode: fatal
    /// in realtime, a fall back to polling alone in hybrid.
    pub fn on_push_exhausted(&self, err: IngestError) -> Result<(), IngestError> {
        match self.mode {
            SchedulerMode::Realtime => {
                tracing::error!(error = %err, "push subscription exhausted in realtime mode");
                Err(err)
            }
            SchedulerMode::Hybrid | SchedulerMode::Polling => {
                tracing::warn!(
                    error = %err,
                    "push subscription exhausted; continuing on polling alone"
                );
                Ok(())
            }
        }
    }

    /// Returns how many heights were queued. Blocks while the queue is full.
    async fn on_arrival(
        &self,
        source: ArrivalSource,
        observed: BlockHeight,
        shutdown: &CancellationToken,
    ) -> Result<u64, IngestError> {
        let decision = {
            let mut state = self.lock_state();
            let now = Instant::now();
            let decision = decide(
                self.mode,
                source,
                observed,
                &state,
                self.fallback_timeout,
                now,
            );
            state.apply(source, decision, now);
            decision
        };

        let (from, to) = match decision {
            Decision::Dispatch { from, to } => (from, to),
            Decision::Duplicate => {
                self.telemetry.record_duplicate();
                tracing::trace!(height = %observed, source = ?source, "dropping already dispatched height");
                return Ok(0);
            }
            Decision::Suppressed => {
                self.telemetry.record_suppressed();
                tracing::debug!(height = %observed, "push is live; poll observation suppressed");
                return Ok(0);
            }
            Decision::Ignored => return Ok(0),
        };

        if from != to {
            tracing::info!(from = %from, to = %to, source = ?source, "filling height gap");
        }
        if to < observed {
            tracing::warn!(
                observed = %observed,
                dispatched_to = %to,
                source = ?source,
                "gap exceeds per-arrival limit; remainder deferred to later arrivals"
            );
        }

        let mut queued = 0;
        for height in BlockHeight::range_inclusive(from, to) {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(height = %height, "shutdown while dispatching; remaining heights dropped");
                    return Ok(queued);
                }
                sent = self.queue.send(height) => {
                    if sent.is_err() {
                        return Err(IngestError::NotRunning);
                    }
                }
            }
            self.telemetry.record_dispatched(height);
            queued += 1;
        }

        Ok(queued)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ArrivalState> {
        self.state.lock().expect("arrival scheduler mutex poisoned")
    }
}
