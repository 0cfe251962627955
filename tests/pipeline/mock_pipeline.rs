use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, fast_config, init_tracing, wait_for_blocks, wait_until},
    mock_rpc::{tx_hash, MockChain, MockRpcServer},
    mock_ws::MockHeadServer,
};
use anyhow::Result;
use blockrelay::{BlockHeight, IngestPipeline, MemorySink, MemoryStore, SchedulerMode, TxStatus};
use tokio::time::sleep;

const SETTLE: Duration = Duration::from_secs(5);

fn heights(range: std::ops::RangeInclusive<u64>) -> Vec<BlockHeight> {
    range.map(BlockHeight::new).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn polling_ingests_every_block_from_genesis() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(6, 2);
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_for_blocks(&store, 6, SETTLE).await?;
    wait_until("all transaction events published", SETTLE, || {
        let sink = sink.clone();
        async move { sink.message_count() >= 12 }
    })
    .await?;
    let telemetry = pipeline.telemetry();
    pipeline.stop().await?;
    server.shutdown().await;

    let stored = store.block_heights();
    assert_eq!(stored, heights(0..=5));
    assert_is_contiguous(&stored);
    assert_eq!(store.transaction_count(), 12);
    for height in 0..6 {
        for index in 0..2 {
            let record = store
                .get_transaction(&tx_hash(height, index))
                .expect("transaction stored");
            assert_eq!(record.status, TxStatus::Processed);
            assert_eq!(record.block_number, BlockHeight::new(height));
            assert_eq!(record.network, "testnet");
            assert!(record.processed_at.is_some());
        }
    }

    assert_eq!(sink.message_count(), 12);
    assert_eq!(sink.duplicates(), 0);
    assert_eq!(sink.streams().len(), 1);
    assert!(sink
        .messages()
        .iter()
        .all(|message| message.subject == "blockrelay.testnet.transactions"));

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.blocks_processed, 6);
    assert_eq!(snapshot.blocks_dispatched, 6);
    assert_eq!(snapshot.block_failures, 0);
    assert_eq!(snapshot.events_published, 12);
    // Header and transactions come from one full-block request per height.
    assert_eq!(chain.block_requests(), 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn advancing_tip_is_filled_without_gaps() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(20, 1);
    chain.set_tip(4);
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_for_blocks(&store, 5, SETTLE).await?;
    chain.advance_tip_by(5);
    wait_for_blocks(&store, 10, SETTLE).await?;
    assert_eq!(pipeline.watermark(), Some(BlockHeight::new(9)));
    let telemetry = pipeline.telemetry();
    pipeline.stop().await?;
    server.shutdown().await;

    assert_eq!(store.block_heights(), heights(0..=9));
    assert_eq!(telemetry.snapshot().blocks_dispatched, 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_resumes_above_stored_progress() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(10, 1);
    chain.set_tip(4);
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .build()?;

    let mut first = IngestPipeline::connect(config.clone(), store.clone(), sink.clone())?;
    first.start().await?;
    wait_for_blocks(&store, 5, SETTLE).await?;
    first.stop().await?;

    chain.set_tip(9);
    let mut second = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    second.start().await?;
    wait_for_blocks(&store, 10, SETTLE).await?;
    let telemetry = second.telemetry();
    second.stop().await?;
    server.shutdown().await;

    assert_eq!(store.block_heights(), heights(0..=9));
    assert_eq!(telemetry.snapshot().blocks_processed, 5);
    assert_eq!(telemetry.highest_processed(), Some(BlockHeight::new(9)));
    assert_eq!(sink.duplicates(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_receipt_fails_only_that_transaction() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3, 2);
    let broken = tx_hash(1, 0);
    chain.drop_receipt(broken.clone());
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .include_receipts(true)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_for_blocks(&store, 3, SETTLE).await?;
    wait_until("healthy transactions published", SETTLE, || {
        let sink = sink.clone();
        async move { sink.message_count() >= 5 }
    })
    .await?;
    pipeline.stop().await?;
    server.shutdown().await;

    let failed = store.get_transaction(&broken).expect("failed transaction stored");
    assert_eq!(failed.status, TxStatus::Failed);
    assert!(failed.processed_at.is_none());

    let sibling = store
        .get_transaction(&tx_hash(1, 1))
        .expect("sibling transaction stored");
    assert_eq!(sibling.status, TxStatus::Processed);
    assert_eq!(sibling.gas_used, Some(21_000));
    assert_eq!(sibling.receipt_status, Some(true));

    assert_eq!(store.transaction_count(), 6);
    assert_eq!(sink.message_count(), 5);
    assert!(sink
        .messages()
        .iter()
        .all(|message| message.idempotency_key != broken));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_fetch_failures_are_retried() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(4, 1);
    chain.fail_block_fetches(2, 2);
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_for_blocks(&store, 4, SETTLE).await?;
    let telemetry = pipeline.telemetry();
    pipeline.stop().await?;
    server.shutdown().await;

    assert_eq!(store.block_heights(), heights(0..=3));
    let snapshot = telemetry.snapshot();
    assert!(snapshot.fetch_retries >= 2, "snapshot: {snapshot:?}");
    assert_eq!(snapshot.block_failures, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disabled_publishing_still_persists() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3, 3);
    let server = MockRpcServer::start(chain.clone()).await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Polling)
        .start_height(0u64)
        .publish_enabled(false)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_for_blocks(&store, 3, SETTLE).await?;
    pipeline.stop().await?;
    server.shutdown().await;

    assert_eq!(store.transaction_count(), 9);
    assert_eq!(sink.message_count(), 0);
    assert!(sink.streams().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hybrid_dispatches_pushed_heights_while_polls_are_suppressed() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(10, 1);
    let server = MockRpcServer::start(chain.clone()).await?;
    let heads = MockHeadServer::start().await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Hybrid)
        .ws_url(heads.url())
        .fallback_timeout(Duration::from_secs(30))
        .start_height(0u64)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_until("push subscription established", SETTLE, || {
        let subscribed = heads.subscriptions() == 1;
        async move { subscribed }
    })
    .await?;
    heads.announce(3);
    wait_for_blocks(&store, 4, SETTLE).await?;

    // Polls keep observing tip 9 but push stays authoritative.
    sleep(Duration::from_millis(300)).await;
    let telemetry = pipeline.telemetry();
    assert_eq!(store.block_heights(), heights(0..=3));
    assert!(telemetry.snapshot().suppressed_arrivals >= 1);
    assert_eq!(telemetry.snapshot().push_arrivals, 1);

    heads.announce(5);
    wait_for_blocks(&store, 6, SETTLE).await?;
    pipeline.stop().await?;

    assert_eq!(store.block_heights(), heights(0..=5));
    wait_until("unsubscribe sent on stop", SETTLE, || {
        let unsubscribed = heads.unsubscribes() == 1;
        async move { unsubscribed }
    })
    .await?;
    heads.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hybrid_falls_back_to_polling_when_push_is_silent() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(5, 1);
    let server = MockRpcServer::start(chain.clone()).await?;
    let heads = MockHeadServer::start().await?;
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    let config = fast_config(server.url(), SchedulerMode::Hybrid)
        .ws_url(heads.url())
        .fallback_timeout(Duration::from_millis(300))
        .start_height(0u64)
        .build()?;
    let mut pipeline = IngestPipeline::connect(config, store.clone(), sink.clone())?;
    pipeline.start().await?;

    wait_for_blocks(&store, 5, SETTLE).await?;
    let telemetry = pipeline.telemetry();
    pipeline.stop().await?;
    heads.shutdown().await;
    server.shutdown().await;

    assert_eq!(store.block_heights(), heights(0..=4));
    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.push_arrivals, 0);
    assert!(snapshot.poll_arrivals >= 1);
    Ok(())
}
