//! Pure arrival decisions: given the configured mode, which source an
//! observation came from, and the scheduler's current state, decide whether
//! to dispatch, and which heights.

use crate::error::IngestError;
use crate::model::BlockHeight;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulerMode {
    /// Push subscription only.
    Realtime,
    /// Fixed-interval polling only.
    #[default]
    Polling,
    /// Push subscription with polling as a safety net.
    Hybrid,
}

impl SchedulerMode {
    pub fn uses_push(self) -> bool {
        matches!(self, SchedulerMode::Realtime | SchedulerMode::Hybrid)
    }

    pub fn uses_polling(self) -> bool {
        matches!(self, SchedulerMode::Polling | SchedulerMode::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerMode::Realtime => "realtime",
            SchedulerMode::Polling => "polling",
            SchedulerMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerMode {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(SchedulerMode::Realtime),
            "polling" => Ok(SchedulerMode::Polling),
            "hybrid" => Ok(SchedulerMode::Hybrid),
            other => Err(IngestError::Configuration(format!(
                "unknown scheduler mode `{other}` (expected realtime, polling or hybrid)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalSource {
    Push,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch every height in `from..=to`, ascending.
    Dispatch { from: BlockHeight, to: BlockHeight },
    /// At or below the watermark, or below the start height.
    Duplicate,
    /// Poll observation while push is still authoritative.
    Suppressed,
    /// The source is not active in this mode.
    Ignored,
}

impl Decision {
    pub fn dispatch_count(&self) -> u64 {
        match *self {
            Decision::Dispatch { from, to } => to.get() - from.get() + 1,
            _ => 0,
        }
    }
}

/// Mutable scheduler state guarded by the scheduler's mutex.
#[derive(Debug, Clone, Copy)]
pub struct ArrivalState {
    /// Highest height already dispatched.
    pub watermark: Option<BlockHeight>,
    /// First height to dispatch while no watermark exists yet.
    pub floor: Option<BlockHeight>,
    /// Most heights one arrival may dispatch; unbounded when `None`.
    pub max_span: Option<u64>,
    /// Most recent push arrival, whether or not it dispatched anything.
    pub last_push_at: Option<Instant>,
    /// When the scheduler started; stands in for the last push until one arrives.
    pub started_at: Instant,
}

impl ArrivalState {
    pub fn new(watermark: Option<BlockHeight>, started_at: Instant) -> Self {
        Self {
            watermark,
            floor: None,
            max_span: None,
            last_push_at: None,
            started_at,
        }
    }

    pub fn with_floor(mut self, floor: Option<BlockHeight>) -> Self {
        self.floor = floor;
        self
    }

    pub fn with_max_span(mut self, max_span: Option<u64>) -> Self {
        self.max_span = max_span.filter(|span| *span > 0);
        self
    }

    /// Whether push activity was seen within `fallback_timeout` of `now`.
    pub fn push_is_fresh(&self, fallback_timeout: Duration, now: Instant) -> bool {
        let reference = self.last_push_at.unwrap_or(self.started_at);
        now.saturating_duration_since(reference) < fallback_timeout
    }

    /// Records the arrival and advances the watermark for a dispatch.
    pub fn apply(&mut self, source: ArrivalSource, decision: Decision, now: Instant) {
        if source == ArrivalSource::Push {
            self.last_push_at = Some(now);
        }
        if let Decision::Dispatch { to, .. } = decision {
            self.watermark = Some(to);
        }
    }
}

pub fn decide(
    mode: SchedulerMode,
    source: ArrivalSource,
    observed: BlockHeight,
    state: &ArrivalState,
    fallback_timeout: Duration,
    now: Instant,
) -> Decision {
    let accepted = match source {
        ArrivalSource::Push => mode.uses_push(),
        ArrivalSource::Poll => mode.uses_polling(),
    };
    if !accepted {
        return Decision::Ignored;
    }

    match (state.watermark, state.floor) {
        (Some(watermark), _) if observed <= watermark => return Decision::Duplicate,
        (None, Some(floor)) if observed < floor => return Decision::Duplicate,
        _ => {}
    }

    if mode == SchedulerMode::Hybrid
        && source == ArrivalSource::Poll
        && state.push_is_fresh(fallback_timeout, now)
    {
        return Decision::Suppressed;
    }

    let from = match state.watermark {
        Some(watermark) => watermark.next(),
        None => state.floor.unwrap_or(observed),
    };
    let to = match state.max_span {
        Some(span) => observed.min(BlockHeight::new(from.get().saturating_add(span - 1))),
        None => observed,
    };
    Decision::Dispatch { from, to }
}
