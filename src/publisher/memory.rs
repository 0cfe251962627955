//! In-process [`EventSink`] with stream retention and an idempotency window.

use super::{EventSink, PublishAck, StreamSettings};
use anyhow::{bail, Result};
use futures::future::{self, BoxFuture};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub stream: String,
    pub subject: String,
    pub payload: Vec<u8>,
    pub idempotency_key: String,
    received_at: Instant,
}

#[derive(Debug, Default)]
struct SinkState {
    streams: HashMap<String, StreamSettings>,
    messages: VecDeque<StoredMessage>,
    recent_keys: HashMap<(String, String), Instant>,
}

impl SinkState {
    fn stream_for(&self, subject: &str) -> Option<&StreamSettings> {
        self.streams.values().find(|settings| settings.covers(subject))
    }

    fn enforce_retention(&mut self, settings: &StreamSettings, now: Instant) {
        let stream = settings.name.as_str();
        self.messages.retain(|message| {
            message.stream != stream
                || now.saturating_duration_since(message.received_at) < settings.max_age
        });

        let mut in_stream = self
            .messages
            .iter()
            .filter(|message| message.stream == stream)
            .count() as u64;
        while in_stream > settings.max_messages {
            match self.messages.iter().position(|message| message.stream == stream) {
                Some(oldest) => {
                    self.messages.remove(oldest);
                    in_stream -= 1;
                }
                None => break,
            }
        }

        self.recent_keys.retain(|(key_stream, _), seen_at| {
            key_stream != stream
                || now.saturating_duration_since(*seen_at) < settings.duplicate_window
        });
    }
}

#[derive(Debug)]
pub struct MemorySink {
    state: Mutex<SinkState>,
    connected: AtomicBool,
    max_payload_bytes: usize,
    duplicates: AtomicU64,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_payload(max_payload_bytes: usize) -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            connected: AtomicBool::new(true),
            max_payload_bytes,
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.lock_state().messages.iter().cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.lock_state().messages.len()
    }

    /// Publishes swallowed by the dedup window.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn streams(&self) -> Vec<StreamSettings> {
        self.lock_state().streams.values().cloned().collect()
    }

    fn publish_now(
        &self,
        subject: String,
        payload: Vec<u8>,
        idempotency_key: String,
    ) -> Result<PublishAck> {
        if !self.is_connected() {
            bail!("event sink is not connected");
        }
        if payload.len() > self.max_payload_bytes {
            bail!(
                "payload of {} bytes exceeds limit of {} bytes",
                payload.len(),
                self.max_payload_bytes
            );
        }

        let now = Instant::now();
        let mut state = self.lock_state();
        let Some(settings) = state.stream_for(&subject).cloned() else {
            bail!("no stream accepts subject {subject}");
        };
        state.enforce_retention(&settings, now);

        let dedup_key = (settings.name.clone(), idempotency_key.clone());
        if state.recent_keys.contains_key(&dedup_key) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(PublishAck { duplicate: true });
        }
        state.recent_keys.insert(dedup_key, now);

        state.messages.push_back(StoredMessage {
            stream: settings.name.clone(),
            subject,
            payload,
            idempotency_key,
            received_at: now,
        });
        state.enforce_retention(&settings, now);
        Ok(PublishAck { duplicate: false })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().expect("memory sink mutex poisoned")
    }
}

impl EventSink for MemorySink {
    fn ensure_stream(&self, settings: StreamSettings) -> BoxFuture<'_, Result<()>> {
        let outcome = if settings.subjects.is_empty() {
            Err(anyhow::anyhow!("stream {} has no subjects", settings.name))
        } else {
            self.lock_state()
                .streams
                .insert(settings.name.clone(), settings);
            Ok(())
        };
        Box::pin(future::ready(outcome))
    }

    fn publish(
        &self,
        subject: String,
        payload: Vec<u8>,
        idempotency_key: String,
    ) -> BoxFuture<'_, Result<PublishAck>> {
        Box::pin(future::ready(self.publish_now(subject, payload, idempotency_key)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
