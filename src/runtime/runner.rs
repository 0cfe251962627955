use crate::publisher::EventSink;
use crate::runtime::config::IngestConfig;
use crate::runtime::pipeline::IngestPipeline;
use crate::storage::BlockStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the pipeline lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner {
    pipeline: IngestPipeline,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    /// Wraps `pipeline` and wires a root [`CancellationToken`] that propagates
    /// through every task of each run (scheduler, subscription, workers).
    pub fn new(mut pipeline: IngestPipeline) -> Self {
        let shutdown = CancellationToken::new();
        pipeline.replace_shutdown_root(shutdown.clone());
        Self {
            pipeline,
            shutdown,
            started: false,
        }
    }

    /// Builds a runner around the JSON-RPC chain client described by `config`.
    pub fn from_config(
        config: IngestConfig,
        store: Arc<dyn BlockStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Ok(Self::new(IngestPipeline::connect(config, store, sink)?))
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.pipeline.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the pipeline gracefully by cancelling the root token and delegating to it.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        let result = self.pipeline.stop().await;
        self.started = false;
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled
    /// elsewhere, including by a fatal pipeline error.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.pipeline.replace_shutdown_root(self.shutdown.clone());
    }
}
