//! Background tasks feeding the arrival scheduler: the fixed-interval poll
//! loop and the pump that drains heights announced by the push subscription.

use super::ArrivalScheduler;
use crate::error::IngestError;
use crate::model::BlockHeight;
use crate::rpc::ChainLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Re-queries the latest height every `polling_interval` and hands it to the
/// scheduler. Fetch failures are logged and retried on the next tick.
pub fn spawn_poll_loop(
    chain: Arc<dyn ChainLink>,
    scheduler: Arc<ArrivalScheduler>,
    polling_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let latest = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        latest = chain.latest_height() => latest,
                    };

                    match latest {
                        Ok(height) => match scheduler.on_poll(height, &shutdown).await {
                            Ok(0) => {}
                            Ok(queued) => {
                                tracing::debug!(height = %height, queued, "poll dispatched heights");
                            }
                            Err(IngestError::NotRunning) => {
                                tracing::debug!("dispatch queue closed; stopping poll loop");
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "poll dispatch failed");
                            }
                        },
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to poll latest height");
                        }
                    }
                }
            }
        }

        tracing::info!("poll loop stopped");
    })
}

/// Forwards heights from the supervisor's head channel into the scheduler.
/// Awaiting the scheduler here is what propagates queue backpressure back to
/// the subscription read loop.
pub fn spawn_push_pump(
    mut heads: mpsc::Receiver<BlockHeight>,
    scheduler: Arc<ArrivalScheduler>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let height = tokio::select! {
                _ = shutdown.cancelled() => break,
                height = heads.recv() => match height {
                    Some(height) => height,
                    None => break,
                },
            };

            match scheduler.on_push(height, &shutdown).await {
                Ok(_) => {}
                Err(IngestError::NotRunning) => {
                    tracing::debug!("dispatch queue closed; stopping push pump");
                    break;
                }
                Err(err) => {
                    tracing::warn!(height = %height, error = %err, "push dispatch failed");
                }
            }
        }

        tracing::info!("push pump stopped");
    })
}
