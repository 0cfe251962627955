//! Error taxonomy shared by every pipeline stage.
//!
//! Internal plumbing still propagates `anyhow::Error`; these variants are
//! wrapped into it and recovered with `downcast_ref` wherever the caller's
//! behavior depends on the failure kind.

use crate::model::BlockHeight;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Transport or handshake failure on the push channel.
    #[error("connection error: {0}")]
    Connection(String),

    /// A supervisor operation was invoked before `open` succeeded.
    #[error("connection supervisor is not running")]
    NotRunning,

    /// Every reconnect attempt failed; the supervisor is stopped for good.
    #[error("push connection exhausted after {attempts} reconnect attempts")]
    ConnectionExhausted { attempts: usize },

    #[error("failed to fetch block {height}: {reason}")]
    Fetch { height: BlockHeight, reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    /// Aggregate failure of a multi-item publish. Items not counted in
    /// `failed` were delivered.
    #[error("failed to publish {failed} of {total} transaction events")]
    Publish { failed: usize, total: usize },

    #[error("event sink rejected message: {0}")]
    PublishRejected(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl IngestError {
    /// Returns `true` for failures that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::ConnectionExhausted { .. } | IngestError::Configuration(_)
        )
    }
}

/// Looks for an [`IngestError`] anywhere in an `anyhow` chain.
pub fn ingest_error(err: &anyhow::Error) -> Option<&IngestError> {
    err.chain().find_map(|cause| cause.downcast_ref::<IngestError>())
}
