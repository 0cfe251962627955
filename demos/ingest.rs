use std::env;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use blockrelay::{IngestConfig, MemorySink, MemoryStore, Runner, TelemetrySnapshot};

const DEFAULT_RPC_URL: &str = "http://localhost:8545";
const DEFAULT_LOG_DIRECTIVE: &str = "info,blockrelay=debug";

/// Ingests from the node described by `BLOCKRELAY_*` variables into memory
/// until Ctrl-C, then prints what went through the pipeline.
#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    if env::var_os("BLOCKRELAY_RPC_URL").is_none() {
        env::set_var("BLOCKRELAY_RPC_URL", DEFAULT_RPC_URL);
    }
    let config = IngestConfig::from_env().context("invalid BLOCKRELAY_* configuration")?;
    println!(
        "Ingesting {} in {} mode from {} ({} workers)",
        config.network(),
        config.mode(),
        config.rpc_url(),
        config.workers()
    );

    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let mut runner = Runner::from_config(config, store.clone(), sink.clone())?;
    let telemetry = runner.pipeline().telemetry();

    let started = Instant::now();
    let run_result = runner.run_until_ctrl_c().await;
    print_summary(&telemetry.snapshot(), started, &store, &sink);

    run_result
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    blockrelay::init_tracing();
}

fn print_summary(
    snapshot: &TelemetrySnapshot,
    started: Instant,
    store: &MemoryStore,
    sink: &MemorySink,
) {
    let seconds = started.elapsed().as_secs_f64();
    let rate = if seconds > 0.0 {
        snapshot.blocks_processed as f64 / seconds
    } else {
        0.0
    };
    let range = match (store.block_heights().first(), store.block_heights().last()) {
        (Some(first), Some(last)) => format!("{first} -> {last}"),
        _ => "none".to_string(),
    };

    println!(
        "Processed {} blocks ({range}) in {seconds:.2}s [{rate:.2} blocks/s]",
        snapshot.blocks_processed
    );
    println!(
        "Transactions: {} written, {} failed; events: {} published, {} failed",
        snapshot.transactions_written,
        snapshot.transactions_failed,
        sink.message_count(),
        snapshot.publish_failures
    );
    println!(
        "Arrivals: {} push, {} poll, {} suppressed, {} duplicate; reconnects: {}/{}",
        snapshot.push_arrivals,
        snapshot.poll_arrivals,
        snapshot.suppressed_arrivals,
        snapshot.duplicate_arrivals,
        snapshot.reconnects,
        snapshot.reconnect_attempts
    );
}
