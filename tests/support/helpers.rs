use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use blockrelay::{
    BlockHeight, ConnectionState, ConnectionSupervisor, IngestConfig, IngestConfigBuilder,
    MemoryStore, SchedulerMode,
};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Short intervals so pipeline tests settle in well under a second.
pub fn fast_config(rpc_url: &str, mode: SchedulerMode) -> IngestConfigBuilder {
    IngestConfig::builder()
        .rpc_url(rpc_url)
        .network("testnet")
        .mode(mode)
        .polling_interval(Duration::from_millis(50))
        .fallback_timeout(Duration::from_millis(500))
        .reconnect_attempts(3)
        .reconnect_delay(Duration::from_millis(10))
        .probe_interval(Duration::from_secs(5))
        .handshake_timeout(Duration::from_secs(2))
        .workers(2)
        .batch_size(8)
        .retry_attempts(3)
        .retry_delay(Duration::from_millis(10))
        .queue_capacity(32)
        .rpc_timeout(Duration::from_secs(2))
        .metrics_interval(Duration::from_secs(60))
        .shutdown_grace(Duration::from_secs(2))
}

/// Polls `condition` every 20ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if condition().await {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{what} did not happen within {:?}", timeout);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_blocks(store: &Arc<MemoryStore>, count: usize, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let stored = store.block_count();
        if stored >= count {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!(
                "store did not reach {count} blocks within {:?} (stored: {stored}, heights: {:?})",
                timeout,
                store.block_heights()
            );
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_state(
    supervisor: &ConnectionSupervisor,
    expected: ConnectionState,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = supervisor.state();
        if current == expected {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("supervisor did not reach {expected:?} within {:?} (state: {current:?})", timeout);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn assert_is_contiguous(heights: &[BlockHeight]) {
    for window in heights.windows(2) {
        if let [lhs, rhs] = window {
            assert_eq!(*rhs, lhs.next(), "heights must increase without gaps");
        }
    }
}
