use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_for_state, wait_until},
    mock_ws::MockHeadServer,
};
use anyhow::{Context, Result};
use blockrelay::{
    BlockHeight, ConnectionState, ConnectionSupervisor, IngestError, RetryPolicy,
    SupervisorConfig, Telemetry,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const SETTLE: Duration = Duration::from_secs(5);

const FAST_PROBE: Duration = Duration::from_millis(100);

fn supervisor_for(url: &str, telemetry: Arc<Telemetry>) -> Arc<ConnectionSupervisor> {
    probing_supervisor_for(url, Duration::from_secs(5), telemetry)
}

fn probing_supervisor_for(
    url: &str,
    probe_interval: Duration,
    telemetry: Arc<Telemetry>,
) -> Arc<ConnectionSupervisor> {
    Arc::new(ConnectionSupervisor::new(
        SupervisorConfig {
            endpoint: Some(url.to_string()),
            handshake_timeout: Duration::from_secs(2),
            probe_interval,
            reconnect: RetryPolicy::quadratic(3, Duration::from_millis(10)),
        },
        telemetry,
    ))
}

async fn next_head(heads: &mut mpsc::Receiver<BlockHeight>) -> Result<BlockHeight> {
    timeout(SETTLE, heads.recv())
        .await
        .context("no head delivered in time")?
        .context("head channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delivers_announced_heads_and_unsubscribes_on_close() -> Result<()> {
    init_tracing();
    let server = MockHeadServer::start().await?;
    let telemetry = Arc::new(Telemetry::default());
    let supervisor = supervisor_for(server.url(), telemetry.clone());

    supervisor.open().await?;
    assert_eq!(supervisor.state(), ConnectionState::Live);
    assert!(supervisor.subscription_id().is_some());

    let (heads_tx, mut heads_rx) = mpsc::channel(8);
    supervisor.subscribe(heads_tx)?;
    let shutdown = CancellationToken::new();
    let run = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    server.announce(7);
    server.announce(8);
    assert_eq!(next_head(&mut heads_rx).await?, BlockHeight::new(7));
    assert_eq!(next_head(&mut heads_rx).await?, BlockHeight::new(8));

    shutdown.cancel();
    run.await??;
    assert_eq!(supervisor.state(), ConnectionState::Stopped);
    assert_eq!(telemetry.connection_state(), ConnectionState::Stopped);
    wait_until("unsubscribe received", SETTLE, || {
        let unsubscribed = server.unsubscribes() == 1;
        async move { unsubscribed }
    })
    .await?;

    // Stopped is terminal.
    assert!(supervisor.open().await.is_err());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnects_after_the_peer_drops_the_session() -> Result<()> {
    init_tracing();
    let server = MockHeadServer::start().await?;
    let telemetry = Arc::new(Telemetry::default());
    let supervisor = supervisor_for(server.url(), telemetry.clone());

    supervisor.open().await?;
    let first_subscription = supervisor.subscription_id();
    let (heads_tx, mut heads_rx) = mpsc::channel(8);
    supervisor.subscribe(heads_tx)?;
    let shutdown = CancellationToken::new();
    let run = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    server.drop_connections();
    wait_until("second subscription", SETTLE, || {
        let resubscribed = server.subscriptions() == 2;
        async move { resubscribed }
    })
    .await?;
    wait_for_state(&supervisor, ConnectionState::Live, SETTLE).await?;
    assert_ne!(supervisor.subscription_id(), first_subscription);

    server.announce(11);
    assert_eq!(next_head(&mut heads_rx).await?, BlockHeight::new(11));

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.reconnects, 1);
    assert!(snapshot.reconnect_attempts >= 1);

    shutdown.cancel();
    run.await??;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_budget_is_bounded() -> Result<()> {
    init_tracing();
    let server = MockHeadServer::start().await?;
    let telemetry = Arc::new(Telemetry::default());
    let supervisor = supervisor_for(server.url(), telemetry.clone());

    supervisor.open().await?;
    let (heads_tx, _heads_rx) = mpsc::channel(8);
    supervisor.subscribe(heads_tx)?;
    let run = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run(CancellationToken::new()).await })
    };

    server.shutdown().await;

    let outcome = timeout(Duration::from_secs(10), run)
        .await
        .context("supervisor kept reconnecting past its budget")??;
    assert!(matches!(
        outcome,
        Err(IngestError::ConnectionExhausted { attempts: 3 })
    ));
    assert_eq!(telemetry.reconnect_attempts(), 3);
    assert_eq!(supervisor.state(), ConnectionState::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_peer_is_replaced_after_missed_health_probes() -> Result<()> {
    init_tracing();
    let server = MockHeadServer::start().await?;
    let telemetry = Arc::new(Telemetry::default());
    let supervisor = probing_supervisor_for(server.url(), FAST_PROBE, telemetry.clone());

    supervisor.open().await?;
    let (heads_tx, mut heads_rx) = mpsc::channel(8);
    supervisor.subscribe(heads_tx)?;
    let shutdown = CancellationToken::new();
    let run = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    server.silence_sessions();
    wait_until("resubscribed after silence", FAST_PROBE * 20, || {
        let resubscribed = server.subscriptions() == 2;
        async move { resubscribed }
    })
    .await?;
    wait_for_state(&supervisor, ConnectionState::Live, SETTLE).await?;
    assert_eq!(telemetry.snapshot().reconnects, 1);

    server.announce(4);
    assert_eq!(next_head(&mut heads_rx).await?, BlockHeight::new(4));

    shutdown.cancel();
    run.await??;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_head_channel_does_not_look_like_a_dead_peer() -> Result<()> {
    init_tracing();
    let server = MockHeadServer::start().await?;
    let telemetry = Arc::new(Telemetry::default());
    let supervisor = probing_supervisor_for(server.url(), FAST_PROBE, telemetry.clone());

    supervisor.open().await?;
    let (heads_tx, mut heads_rx) = mpsc::channel(1);
    supervisor.subscribe(heads_tx)?;
    let shutdown = CancellationToken::new();
    let run = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    for height in 1..=3 {
        server.announce(height);
    }
    // The read loop stays parked on the full channel across several probes.
    sleep(FAST_PROBE * 6).await;

    assert_eq!(server.subscriptions(), 1);
    assert_eq!(supervisor.state(), ConnectionState::Live);
    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(snapshot.reconnects, 0);

    for height in 1..=3 {
        assert_eq!(next_head(&mut heads_rx).await?, BlockHeight::new(height));
    }

    shutdown.cancel();
    run.await??;
    server.shutdown().await;
    Ok(())
}
