//! Outbound event fan-out. Publishing is best effort: it never gates or
//! rolls back persistence.

pub mod event;
pub mod memory;

pub use event::TransactionEvent;
pub use memory::{MemorySink, StoredMessage};

use crate::error::IngestError;
use crate::model::TransactionRecord;
use anyhow::Result;
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STREAM_NAME: &str = "TRANSACTIONS";
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_MESSAGES: u64 = 1_000_000;
const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Stream administration applied once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub name: String,
    /// Exact subjects, or prefixes ending in `.>`.
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub max_messages: u64,
    pub duplicate_window: Duration,
}

impl StreamSettings {
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_STREAM_NAME.to_string(),
            subjects: vec![subject.into()],
            max_age: DEFAULT_MAX_AGE,
            max_messages: DEFAULT_MAX_MESSAGES,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }

    pub fn covers(&self, subject: &str) -> bool {
        self.subjects.iter().any(|pattern| match pattern.strip_suffix('>') {
            Some(prefix) => subject.starts_with(prefix) && subject.len() > prefix.len(),
            None => pattern == subject,
        })
    }
}

/// Broker acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// The idempotency key was already seen inside the dedup window.
    pub duplicate: bool,
}

/// Outbound stream collaborator.
pub trait EventSink: Send + Sync {
    /// Creates the stream if absent, otherwise updates its settings.
    fn ensure_stream(&self, settings: StreamSettings) -> BoxFuture<'_, Result<()>>;

    fn publish(
        &self,
        subject: String,
        payload: Vec<u8>,
        idempotency_key: String,
    ) -> BoxFuture<'_, Result<PublishAck>>;

    fn is_connected(&self) -> bool;
}

pub fn transactions_subject(prefix: &str, network: &str) -> String {
    format!("{prefix}.{network}.transactions")
}

#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    subject: String,
    enabled: bool,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, subject: impl Into<String>, enabled: bool) -> Self {
        Self {
            sink,
            subject: subject.into(),
            enabled,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_active(&self) -> bool {
        self.enabled && self.sink.is_connected()
    }

    /// Applies stream settings; a no-op when publishing is disabled.
    pub async fn ensure_stream(&self, settings: StreamSettings) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        tracing::info!(
            stream = %settings.name,
            subjects = ?settings.subjects,
            duplicate_window_secs = settings.duplicate_window.as_secs(),
            "ensuring outbound stream"
        );
        self.sink.ensure_stream(settings).await
    }

    /// Publishes one transaction keyed by its hash. Returns success without
    /// sending when disabled or disconnected.
    pub async fn publish_one(&self, record: &TransactionRecord) -> Result<(), IngestError> {
        if !self.is_active() {
            return Ok(());
        }
        self.send(record).await
    }

    /// Publishes every record independently. On partial failure the error
    /// names how many failed; the rest count as delivered.
    pub async fn publish_many(&self, records: &[TransactionRecord]) -> Result<usize, IngestError> {
        if records.is_empty() || !self.is_active() {
            return Ok(0);
        }

        let outcomes = join_all(records.iter().map(|record| self.send(record))).await;
        let mut failed = 0;
        for (record, outcome) in records.iter().zip(outcomes) {
            if let Err(err) = outcome {
                failed += 1;
                tracing::warn!(tx = %record.hash, error = %err, "transaction event not published");
            }
        }

        if failed > 0 {
            return Err(IngestError::Publish {
                failed,
                total: records.len(),
            });
        }
        Ok(records.len())
    }

    async fn send(&self, record: &TransactionRecord) -> Result<(), IngestError> {
        let event = TransactionEvent::from_record(record);
        let payload = serde_json::to_vec(&event)
            .map_err(|err| IngestError::PublishRejected(format!("encode {}: {err}", record.hash)))?;

        let ack = self
            .sink
            .publish(self.subject.clone(), payload, event.idempotency_key().to_owned())
            .await
            .map_err(|err| IngestError::PublishRejected(format!("{err:#}")))?;

        if ack.duplicate {
            tracing::debug!(tx = %record.hash, "stream deduplicated transaction event");
        }
        Ok(())
    }
}
