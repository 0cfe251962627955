use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{fast_config, init_tracing, wait_for_blocks, wait_until},
    mock_rpc::{MockChain, MockRpcServer},
    mock_ws::unreachable_ws_url,
};
use anyhow::{Context, Result};
use blockrelay::{
    ingest_error, BlockHeight, ConnectionState, IngestError, MemorySink, MemoryStore, Runner,
    SchedulerMode,
};
use tokio::time::{sleep, timeout};

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_does_not_reprocess_blocks() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(12, 1);
    chain.set_tip(4);
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .build()?;
    let mut runner = Runner::from_config(config, store.clone(), sink.clone())?;

    runner.start().await?;
    wait_for_blocks(&store, 5, SETTLE).await?;
    runner.stop().await?;
    assert!(!runner.pipeline().is_running());

    chain.set_tip(9);
    runner.start().await?;
    wait_for_blocks(&store, 10, SETTLE).await?;
    runner.stop().await?;
    server.shutdown().await;

    let heights: Vec<BlockHeight> = (0..=9).map(BlockHeight::new).collect();
    assert_eq!(store.block_heights(), heights);
    assert_eq!(runner.pipeline().telemetry().blocks_processed(), 10);
    assert_eq!(sink.duplicates(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn realtime_push_exhaustion_aborts_the_runner() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(4, 1);
    let server = MockRpcServer::start(chain).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Realtime)
        .ws_url(unreachable_ws_url().await?)
        .reconnect_attempts(2)
        .handshake_timeout(Duration::from_millis(500))
        .build()?;
    let mut runner = Runner::from_config(config, store.clone(), sink)?;

    let outcome = timeout(Duration::from_secs(10), runner.run_until_ctrl_c())
        .await
        .context("runner did not stop after push exhaustion")?;
    server.shutdown().await;

    let err = outcome.expect_err("exhausted push source must abort a realtime run");
    assert!(
        matches!(
            ingest_error(&err),
            Some(IngestError::ConnectionExhausted { attempts: 2 })
        ),
        "unexpected error: {err:#}"
    );
    assert!(!runner.pipeline().is_running());
    assert_eq!(store.block_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hybrid_keeps_polling_after_push_exhaustion() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(5, 1);
    let server = MockRpcServer::start(chain).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Hybrid)
        .ws_url(unreachable_ws_url().await?)
        .reconnect_attempts(2)
        .fallback_timeout(Duration::from_millis(300))
        .start_height(0u64)
        .build()?;
    let mut runner = Runner::from_config(config, store.clone(), sink)?;
    runner.start().await?;

    wait_until("push source stopped", SETTLE, || {
        let stopped = runner.pipeline().connection_state() == Some(ConnectionState::Stopped);
        async move { stopped }
    })
    .await?;
    wait_for_blocks(&store, 5, SETTLE).await?;
    assert!(!runner.cancellation_token().is_cancelled());

    runner.stop().await?;
    server.shutdown().await;
    assert_eq!(store.block_count(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn external_cancellation_stops_the_runner_cleanly() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3, 1);
    let server = MockRpcServer::start(chain).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .build()?;
    let mut runner = Runner::from_config(config, store.clone(), sink)?;
    let token = runner.cancellation_token();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        token.cancel();
    });

    timeout(Duration::from_secs(10), runner.run_until_ctrl_c())
        .await
        .context("runner ignored cancellation")??;
    canceller.await?;
    server.shutdown().await;

    assert_eq!(store.block_count(), 3);
    assert!(!runner.cancellation_token().is_cancelled());
    Ok(())
}
