//! Run-scoped handles for `IngestPipeline`: the per-run cancellation token,
//! fatal error capture, and the metrics reporter.

use crate::model::BlockHeight;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::WeakSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    fatal_handler: FatalErrorHandler,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub queue: WeakSender<BlockHeight>,
    pub metrics_interval: Duration,
    pub stall_after: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            queue,
            metrics_interval,
            stall_after,
        } = params;

        let run_token = shutdown_root.child_token();
        let fatal_handler = FatalErrorHandler::new(shutdown_root.clone(), run_token.clone());
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            queue,
            run_token.clone(),
            metrics_interval,
            stall_after,
        );

        Self {
            run_token,
            fatal_handler,
            metrics_handle: Some(metrics_handle),
        }
    }

    pub(crate) fn fatal_handler(&self) -> FatalErrorHandler {
        self.fatal_handler.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.fatal_handler.error()
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}
