//! Connection supervisor: owns at most one live push subscription, probes its
//! health, and re-establishes it with bounded quadratic backoff.
//!
//! Two loops run per session: a read loop that decodes frames and forwards
//! new heights, and a probe loop that pings the node. Either can raise a
//! reconnect request through a single-slot channel; requests raised while one
//! is already pending are dropped, and requests from a superseded session are
//! ignored by generation. The probe does not judge silence while the read loop
//! is parked on a full head channel, since frames are not being read then.

use super::connection::{HeadSession, SessionWriter, WsSource};
use super::frames::{decode_frame, InboundFrame};
use super::state::ConnectionState;
use crate::error::IngestError;
use crate::model::BlockHeight;
use crate::processor::backoff::{retry_with_policy, RetryCancelled, RetryPolicy};
use crate::runtime::telemetry::Telemetry;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

/// Receives every height announced on the live subscription.
pub type HeadSender = mpsc::Sender<BlockHeight>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub endpoint: Option<String>,
    pub handshake_timeout: Duration,
    pub probe_interval: Duration,
    pub reconnect: RetryPolicy,
}

/// Read-side progress shared between the read and probe loops.
#[derive(Debug, Default)]
struct SessionActivity {
    frames: AtomicU64,
    /// Set while a head is waiting for room in the head channel.
    forwarding: AtomicBool,
}

#[derive(Debug)]
struct ReconnectSignal {
    generation: u64,
    reason: String,
}

struct SessionLoops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SessionLoops {
    fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct SupervisorInner {
    state: ConnectionState,
    generation: u64,
    session: Option<Arc<HeadSession>>,
    pending_reader: Option<WsSource>,
    heads: Option<HeadSender>,
    loops: Option<SessionLoops>,
}

pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    telemetry: Arc<Telemetry>,
    inner: Mutex<SupervisorInner>,
    reconnect_tx: mpsc::Sender<ReconnectSignal>,
    reconnect_rx: Mutex<Option<mpsc::Receiver<ReconnectSignal>>>,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig, telemetry: Arc<Telemetry>) -> Self {
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        telemetry.record_connection_state(ConnectionState::Disconnected);
        Self {
            config,
            telemetry,
            inner: Mutex::new(SupervisorInner::default()),
            reconnect_tx,
            reconnect_rx: Mutex::new(Some(reconnect_rx)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_inner().state
    }

    /// Subscription id of the live session, if any.
    pub fn subscription_id(&self) -> Option<String> {
        self.lock_inner()
            .session
            .as_ref()
            .map(|session| session.subscription_id().to_owned())
    }

    /// Connects and subscribes to new headers.
    pub async fn open(&self) -> Result<(), IngestError> {
        let endpoint = self.endpoint()?;

        {
            let mut inner = self.lock_inner();
            match inner.state {
                ConnectionState::Stopped => {
                    return Err(IngestError::Connection(
                        "connection supervisor is stopped".to_string(),
                    ))
                }
                ConnectionState::Live => return Ok(()),
                _ => self.transition(&mut inner, ConnectionState::Connecting),
            }
        }

        match HeadSession::open(&endpoint, self.config.handshake_timeout).await {
            Ok(session) => {
                let mut inner = self.lock_inner();
                self.install_session(&mut inner, session);
                Ok(())
            }
            Err(err) => {
                let mut inner = self.lock_inner();
                self.transition(&mut inner, ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Registers the channel that receives announced heights and starts the
    /// read and probe loops. Only valid once `open` has succeeded.
    pub fn subscribe(&self, heads: HeadSender) -> Result<(), IngestError> {
        let mut inner = self.lock_inner();
        if inner.state != ConnectionState::Live || inner.session.is_none() {
            return Err(IngestError::NotRunning);
        }
        inner.heads = Some(heads);
        if inner.loops.is_none() {
            self.start_loops(&mut inner);
        }
        Ok(())
    }

    /// Waits for reconnect requests and services them until `shutdown` fires
    /// or the reconnect budget is spent.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), IngestError> {
        let mut signals = {
            let inner = self.lock_inner();
            if inner.heads.is_none() || inner.session.is_none() {
                return Err(IngestError::NotRunning);
            }
            drop(inner);
            self.reconnect_rx
                .lock()
                .expect("supervisor mutex poisoned")
                .take()
                .ok_or(IngestError::NotRunning)?
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.close().await;
                    return Ok(());
                }
                signal = signals.recv() => {
                    let Some(signal) = signal else {
                        return Ok(());
                    };
                    if signal.generation != self.lock_inner().generation {
                        tracing::debug!(reason = %signal.reason, "ignoring reconnect request from superseded session");
                        continue;
                    }

                    tracing::warn!(reason = %signal.reason, "push connection lost; reconnecting");
                    if self.reconnect(&shutdown).await? {
                        continue;
                    }
                    self.close().await;
                    return Ok(());
                }
            }
        }
    }

    /// Best-effort unsubscribe and teardown. Safe to call repeatedly.
    pub async fn close(&self) {
        let session = {
            let mut inner = self.lock_inner();
            if let Some(loops) = inner.loops.take() {
                loops.stop();
            }
            inner.pending_reader = None;
            if !inner.state.is_terminal() {
                self.transition(&mut inner, ConnectionState::Stopped);
            }
            inner.session.take()
        };

        if let Some(session) = session {
            if timeout(self.config.handshake_timeout, session.close())
                .await
                .is_err()
            {
                tracing::debug!("push session close timed out");
            }
        }
    }

    /// Returns `Ok(true)` once a new session is live, `Ok(false)` when
    /// shutdown interrupted the sequence, and `ConnectionExhausted` when all
    /// attempts failed.
    async fn reconnect(&self, shutdown: &CancellationToken) -> Result<bool, IngestError> {
        let endpoint = self.endpoint()?;
        {
            let mut inner = self.lock_inner();
            if let Some(loops) = inner.loops.take() {
                loops.stop();
            }
            inner.session = None;
            inner.pending_reader = None;
            self.transition(&mut inner, ConnectionState::Reconnecting);
        }

        let policy = self.config.reconnect;
        let handshake_timeout = self.config.handshake_timeout;
        let outcome = retry_with_policy(
            policy,
            Some(shutdown),
            |attempt| {
                let endpoint = endpoint.clone();
                {
                    let mut inner = self.lock_inner();
                    self.transition(&mut inner, ConnectionState::Connecting);
                }
                self.telemetry.record_reconnect_attempt();
                tracing::info!(attempt, max_attempts = policy.max_attempts, "reconnect attempt");
                async move {
                    HeadSession::open(&endpoint, handshake_timeout)
                        .await
                        .map_err(anyhow::Error::from)
                }
            },
            |attempt, delay, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "reconnect attempt failed; backing off"
                    );
                } else {
                    tracing::error!(attempt, error = %err, "reconnect attempts exhausted");
                }
            },
        )
        .await;

        match outcome {
            Ok(session) => {
                if shutdown.is_cancelled() {
                    session.close().await;
                    return Ok(false);
                }
                let mut inner = self.lock_inner();
                self.install_session(&mut inner, session);
                self.telemetry.record_reconnected();
                Ok(true)
            }
            Err(err) if err.downcast_ref::<RetryCancelled>().is_some() => Ok(false),
            Err(_) => {
                let mut inner = self.lock_inner();
                self.transition(&mut inner, ConnectionState::Disconnected);
                self.transition(&mut inner, ConnectionState::Stopped);
                Err(IngestError::ConnectionExhausted {
                    attempts: policy.max_attempts,
                })
            }
        }
    }

    fn install_session(&self, inner: &mut SupervisorInner, mut session: HeadSession) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.pending_reader = session.take_reader();
        inner.session = Some(Arc::new(session));
        self.transition(inner, ConnectionState::Live);
        if inner.heads.is_some() {
            self.start_loops(inner);
        }
    }

    fn start_loops(&self, inner: &mut SupervisorInner) {
        let (Some(session), Some(heads)) = (inner.session.clone(), inner.heads.clone()) else {
            return;
        };
        let Some(reader) = inner.pending_reader.take() else {
            return;
        };

        let cancel = CancellationToken::new();
        let activity = Arc::new(SessionActivity::default());
        let reconnect = ReconnectRequester {
            tx: self.reconnect_tx.clone(),
            generation: inner.generation,
        };

        let read_handle = tokio::spawn(read_loop(ReadLoop {
            reader,
            subscription_id: session.subscription_id().to_owned(),
            heads,
            activity: activity.clone(),
            reconnect: reconnect.clone(),
            cancel: cancel.clone(),
        }));
        let probe_handle = tokio::spawn(probe_loop(
            session.writer(),
            self.config.probe_interval,
            activity,
            reconnect,
            cancel.clone(),
        ));

        inner.loops = Some(SessionLoops {
            cancel,
            handles: vec![read_handle, probe_handle],
        });
    }

    fn transition(&self, inner: &mut SupervisorInner, next: ConnectionState) {
        if inner.state == next {
            return;
        }
        if !inner.state.can_transition_to(next) {
            tracing::debug!(previous = ?inner.state, next = ?next, "ignoring invalid connection transition");
            return;
        }
        tracing::debug!(previous = ?inner.state, next = ?next, "push connection state changed");
        inner.state = next;
        self.telemetry.record_connection_state(next);
    }

    fn endpoint(&self) -> Result<String, IngestError> {
        self.config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| IngestError::Connection("push endpoint is not configured".to_string()))
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, SupervisorInner> {
        self.inner.lock().expect("supervisor mutex poisoned")
    }
}

#[derive(Clone)]
struct ReconnectRequester {
    tx: mpsc::Sender<ReconnectSignal>,
    generation: u64,
}

impl ReconnectRequester {
    fn request(&self, reason: impl Into<String>) {
        let signal = ReconnectSignal {
            generation: self.generation,
            reason: reason.into(),
        };
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                tracing::debug!(reason = %signal.reason, "reconnect already pending; dropping request");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

struct ReadLoop {
    reader: WsSource,
    subscription_id: String,
    heads: HeadSender,
    activity: Arc<SessionActivity>,
    reconnect: ReconnectRequester,
    cancel: CancellationToken,
}

async fn read_loop(mut ctx: ReadLoop) {
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            next = ctx.reader.next() => next,
        };

        let message = match next {
            None => {
                ctx.reconnect.request("push stream ended");
                return;
            }
            Some(Err(err)) => {
                ctx.reconnect.request(format!("push read failed: {err}"));
                return;
            }
            Some(Ok(message)) => message,
        };
        ctx.activity.frames.fetch_add(1, Ordering::Relaxed);

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                ctx.reconnect
                    .request(format!("push connection closed by peer: {frame:?}"));
                return;
            }
            _ => continue,
        };

        match decode_frame(text.as_str(), Some(&ctx.subscription_id)) {
            InboundFrame::NewHead { height, hash } => {
                tracing::debug!(height = %height, hash = ?hash, "new head received");
                ctx.activity.forwarding.store(true, Ordering::SeqCst);
                let delivered = tokio::select! {
                    _ = ctx.cancel.cancelled() => return,
                    sent = ctx.heads.send(height) => sent.is_ok(),
                };
                ctx.activity.forwarding.store(false, Ordering::SeqCst);
                if !delivered {
                    tracing::debug!("head receiver dropped; stopping read loop");
                    return;
                }
            }
            InboundFrame::MalformedHead { reason } => {
                tracing::warn!(reason = %reason, "dropping malformed head notification");
            }
            InboundFrame::ForeignPush { subscription } => {
                tracing::debug!(subscription = %subscription, "ignoring push for foreign subscription");
            }
            InboundFrame::ErrorResponse { id, message } => {
                tracing::warn!(id = ?id, message = %message, "node returned an error on the push channel");
            }
            InboundFrame::Response { id, .. } => {
                tracing::trace!(id, "response on push channel");
            }
            InboundFrame::Unrecognized => {
                tracing::trace!("unrecognized frame on push channel");
            }
        }
    }
}

async fn probe_loop(
    writer: SessionWriter,
    probe_interval: Duration,
    activity: Arc<SessionActivity>,
    reconnect: ReconnectRequester,
    cancel: CancellationToken,
) {
    let mut ticker = interval(probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut seen_at_last_probe: Option<u64> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let current = activity.frames.load(Ordering::Relaxed);
                if activity.forwarding.load(Ordering::SeqCst) {
                    tracing::trace!("head delivery blocked on backpressure; skipping silence check");
                    seen_at_last_probe = None;
                } else if seen_at_last_probe == Some(current) {
                    reconnect.request("no inbound frames since last health probe");
                    return;
                } else {
                    seen_at_last_probe = Some(current);
                }

                if let Err(err) = writer.ping().await {
                    reconnect.request(err.to_string());
                    return;
                }
            }
        }
    }
}
