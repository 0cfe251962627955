use crate::error::IngestError;
use crate::model::BlockHeight;
use crate::processor::backoff::RetryPolicy;
use crate::processor::worker::WorkerSettings;
use crate::publisher::{transactions_subject, StreamSettings};
use crate::rpc::options::{RpcClientOptions, DEFAULT_HTTP_BODY_LIMIT_BYTES};
use crate::runtime::telemetry;
use crate::scheduler::SchedulerMode;
use crate::subscription::SupervisorConfig;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "BLOCKRELAY_";
const DEFAULT_NETWORK: &str = "mainnet";
const DEFAULT_SUBJECT_PREFIX: &str = "blockrelay";
const DEFAULT_POLLING_INTERVAL_MS: u64 = 3_000;
const DEFAULT_FALLBACK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RECONNECT_ATTEMPTS: usize = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_RETRY_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_MAX_GAP_FILL: u64 = 10_000;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Runtime configuration for the ingestion pipeline.
///
/// All instances must be constructed via [`IngestConfig::builder`] or [`IngestConfig::new`]
/// so invariants are validated before any consumer observes the values. Validation
/// failures carry [`IngestError::Configuration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    rpc_url: String,
    ws_url: Option<String>,
    network: String,
    mode: SchedulerMode,
    polling_interval: Duration,
    fallback_timeout: Duration,
    reconnect_attempts: usize,
    reconnect_delay: Duration,
    probe_interval: Duration,
    handshake_timeout: Duration,
    batch_size: usize,
    workers: usize,
    retry_attempts: usize,
    retry_delay: Duration,
    use_upsert: bool,
    upsert_fallback: bool,
    publish_enabled: bool,
    include_receipts: bool,
    queue_capacity: usize,
    max_gap_fill: u64,
    start_height: Option<BlockHeight>,
    subject_prefix: String,
    rpc_timeout: Duration,
    metrics_interval: Duration,
    shutdown_grace: Duration,
    stall_after: Duration,
}

pub struct IngestConfigParams {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub network: String,
    pub mode: SchedulerMode,
    pub polling_interval: Duration,
    pub fallback_timeout: Duration,
    pub reconnect_attempts: usize,
    pub reconnect_delay: Duration,
    pub probe_interval: Duration,
    pub handshake_timeout: Duration,
    pub batch_size: usize,
    pub workers: usize,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    pub use_upsert: bool,
    pub upsert_fallback: bool,
    pub publish_enabled: bool,
    pub include_receipts: bool,
    pub queue_capacity: usize,
    pub max_gap_fill: u64,
    pub start_height: Option<BlockHeight>,
    pub subject_prefix: String,
    pub rpc_timeout: Duration,
    pub metrics_interval: Duration,
    pub shutdown_grace: Duration,
    pub stall_after: Duration,
}

impl IngestConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`IngestConfig::builder`] when most values use defaults.
    pub fn new(params: IngestConfigParams) -> Result<Self> {
        let IngestConfigParams {
            rpc_url,
            ws_url,
            network,
            mode,
            polling_interval,
            fallback_timeout,
            reconnect_attempts,
            reconnect_delay,
            probe_interval,
            handshake_timeout,
            batch_size,
            workers,
            retry_attempts,
            retry_delay,
            use_upsert,
            upsert_fallback,
            publish_enabled,
            include_receipts,
            queue_capacity,
            max_gap_fill,
            start_height,
            subject_prefix,
            rpc_timeout,
            metrics_interval,
            shutdown_grace,
            stall_after,
        } = params;

        let config = Self {
            rpc_url: trimmed_string(rpc_url),
            ws_url: ws_url
                .map(trimmed_string)
                .filter(|value| !value.is_empty()),
            network: trimmed_string(network),
            mode,
            polling_interval,
            fallback_timeout,
            reconnect_attempts,
            reconnect_delay,
            probe_interval,
            handshake_timeout,
            batch_size,
            workers,
            retry_attempts,
            retry_delay,
            use_upsert,
            upsert_fallback,
            publish_enabled,
            include_receipts,
            queue_capacity,
            max_gap_fill,
            start_height,
            subject_prefix: trimmed_string(subject_prefix),
            rpc_timeout,
            metrics_interval,
            shutdown_grace,
            stall_after,
        };

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `BLOCKRELAY_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = EnvSource { lookup };
        let mut builder = Self::builder();

        if let Some(url) = source.string("RPC_URL") {
            builder = builder.rpc_url(url);
        }
        if let Some(url) = source.string("WS_URL") {
            builder = builder.ws_url(url);
        }
        if let Some(network) = source.string("NETWORK") {
            builder = builder.network(network);
        }
        if let Some(mode) = source.parsed::<SchedulerMode>("MODE")? {
            builder = builder.mode(mode);
        }
        if let Some(interval) = source.millis("POLLING_INTERVAL_MS")? {
            builder = builder.polling_interval(interval);
        }
        if let Some(timeout) = source.millis("FALLBACK_TIMEOUT_MS")? {
            builder = builder.fallback_timeout(timeout);
        }
        if let Some(attempts) = source.parsed::<usize>("RECONNECT_ATTEMPTS")? {
            builder = builder.reconnect_attempts(attempts);
        }
        if let Some(delay) = source.millis("RECONNECT_DELAY_MS")? {
            builder = builder.reconnect_delay(delay);
        }
        if let Some(interval) = source.millis("PROBE_INTERVAL_MS")? {
            builder = builder.probe_interval(interval);
        }
        if let Some(timeout) = source.millis("HANDSHAKE_TIMEOUT_MS")? {
            builder = builder.handshake_timeout(timeout);
        }
        if let Some(size) = source.parsed::<usize>("BATCH_SIZE")? {
            builder = builder.batch_size(size);
        }
        if let Some(workers) = source.parsed::<usize>("WORKERS")? {
            builder = builder.workers(workers);
        }
        if let Some(attempts) = source.parsed::<usize>("RETRY_ATTEMPTS")? {
            builder = builder.retry_attempts(attempts);
        }
        if let Some(delay) = source.millis("RETRY_DELAY_MS")? {
            builder = builder.retry_delay(delay);
        }
        if let Some(flag) = source.flag("USE_UPSERT")? {
            builder = builder.use_upsert(flag);
        }
        if let Some(flag) = source.flag("UPSERT_FALLBACK")? {
            builder = builder.upsert_fallback(flag);
        }
        if let Some(flag) = source.flag("PUBLISH_ENABLED")? {
            builder = builder.publish_enabled(flag);
        }
        if let Some(flag) = source.flag("INCLUDE_RECEIPTS")? {
            builder = builder.include_receipts(flag);
        }
        if let Some(capacity) = source.parsed::<usize>("QUEUE_CAPACITY")? {
            builder = builder.queue_capacity(capacity);
        }
        if let Some(span) = source.parsed::<u64>("MAX_GAP_FILL")? {
            builder = builder.max_gap_fill(span);
        }
        if let Some(raw) = source.string("START_HEIGHT") {
            let height = BlockHeight::parse(&raw).map_err(|err| {
                invalid(format!("failed to parse {ENV_PREFIX}START_HEIGHT='{raw}': {err}"))
            })?;
            builder = builder.start_height(height);
        }
        if let Some(prefix) = source.string("SUBJECT_PREFIX") {
            builder = builder.subject_prefix(prefix);
        }

        builder.build()
    }

    /// HTTP JSON-RPC endpoint used for polling and block fetches.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// WebSocket endpoint for the push subscription, when configured.
    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    /// Network tag attached to every record and event.
    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// How long the hybrid scheduler trusts the last push before polls count again.
    pub fn fallback_timeout(&self) -> Duration {
        self.fallback_timeout
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts
    }

    /// Base of the quadratic reconnect backoff.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Maximum transactions per storage write.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Total fetch/persist attempts per block, including the first.
    pub fn retry_attempts(&self) -> usize {
        self.retry_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn use_upsert(&self) -> bool {
        self.use_upsert
    }

    pub fn upsert_fallback(&self) -> bool {
        self.upsert_fallback
    }

    pub fn publish_enabled(&self) -> bool {
        self.publish_enabled
    }

    pub fn include_receipts(&self) -> bool {
        self.include_receipts
    }

    /// Capacity of the bounded dispatch queue between scheduler and workers.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Most heights a single arrival may dispatch; the rest of a larger gap
    /// waits for later arrivals.
    pub fn max_gap_fill(&self) -> u64 {
        self.max_gap_fill
    }

    /// First height to ingest when storage holds no prior progress.
    pub fn start_height(&self) -> Option<BlockHeight> {
        self.start_height
    }

    pub fn subject_prefix(&self) -> &str {
        &self.subject_prefix
    }

    /// Per-request timeout applied to JSON-RPC calls.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Interval between telemetry reports emitted via tracing.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// How long shutdown waits for in-flight blocks before aborting workers.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn stall_after(&self) -> Duration {
        self.stall_after
    }

    /// Outbound subject, `<prefix>.<network>.transactions`.
    pub fn subject(&self) -> String {
        transactions_subject(&self.subject_prefix, &self.network)
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings::for_subject(self.subject())
    }

    /// `retry_attempts` counts retries after the first try.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_attempts.saturating_add(1), self.retry_delay)
    }

    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::quadratic(self.reconnect_attempts, self.reconnect_delay)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            endpoint: self.ws_url.clone(),
            handshake_timeout: self.handshake_timeout,
            probe_interval: self.probe_interval,
            reconnect: self.reconnect_policy(),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            include_receipts: self.include_receipts,
            retry: self.retry_policy(),
            batch_size: self.batch_size,
            use_upsert: self.use_upsert,
            upsert_fallback: self.upsert_fallback,
        }
    }

    pub fn rpc_options(&self) -> RpcClientOptions {
        RpcClientOptions {
            request_timeout: self.rpc_timeout,
            max_concurrent_requests: self.workers.saturating_mul(4).max(8),
            max_request_body_bytes: DEFAULT_HTTP_BODY_LIMIT_BYTES,
            max_response_body_bytes: DEFAULT_HTTP_BODY_LIMIT_BYTES,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_http_url(&self.rpc_url)?;
        ensure_not_empty(&self.network, "network")?;
        ensure_not_empty(&self.subject_prefix, "subject_prefix")?;
        if self.subject_prefix.contains(char::is_whitespace) {
            return Err(invalid("subject_prefix cannot contain whitespace"));
        }

        if self.mode.uses_push() {
            let Some(ws_url) = self.ws_url.as_deref() else {
                return Err(invalid(format!(
                    "ws_url is required in {} mode",
                    self.mode
                )));
            };
            validate_ws_url(ws_url)?;
            ensure_positive_count(self.reconnect_attempts, "reconnect_attempts")?;
            ensure_positive_duration(self.reconnect_delay, "reconnect_delay")?;
            ensure_positive_duration(self.probe_interval, "probe_interval")?;
            ensure_positive_duration(self.handshake_timeout, "handshake_timeout")?;
        } else if let Some(ws_url) = self.ws_url.as_deref() {
            validate_ws_url(ws_url)?;
        }

        if self.mode.uses_polling() {
            ensure_positive_duration(self.polling_interval, "polling_interval")?;
        }
        if self.mode == SchedulerMode::Hybrid {
            ensure_positive_duration(self.fallback_timeout, "fallback_timeout")?;
            if self.fallback_timeout < self.polling_interval {
                return Err(invalid(
                    "fallback_timeout must be at least polling_interval in hybrid mode",
                ));
            }
        }

        ensure_positive_count(self.batch_size, "batch_size")?;
        ensure_positive_count(self.workers, "workers")?;
        ensure_positive_count(self.queue_capacity, "queue_capacity")?;
        if self.max_gap_fill == 0 {
            return Err(invalid("max_gap_fill must be greater than zero"));
        }
        ensure_positive_duration(self.rpc_timeout, "rpc_timeout")?;
        ensure_positive_duration(self.metrics_interval, "metrics_interval")?;
        ensure_positive_duration(self.shutdown_grace, "shutdown_grace")?;
        ensure_positive_duration(self.stall_after, "stall_after")?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    rpc_url: Option<String>,
    ws_url: Option<String>,
    network: Option<String>,
    mode: Option<SchedulerMode>,
    polling_interval: Option<Duration>,
    fallback_timeout: Option<Duration>,
    reconnect_attempts: Option<usize>,
    reconnect_delay: Option<Duration>,
    probe_interval: Option<Duration>,
    handshake_timeout: Option<Duration>,
    batch_size: Option<usize>,
    workers: Option<usize>,
    retry_attempts: Option<usize>,
    retry_delay: Option<Duration>,
    use_upsert: Option<bool>,
    upsert_fallback: Option<bool>,
    publish_enabled: Option<bool>,
    include_receipts: Option<bool>,
    queue_capacity: Option<usize>,
    max_gap_fill: Option<u64>,
    start_height: Option<BlockHeight>,
    subject_prefix: Option<String>,
    rpc_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    shutdown_grace: Option<Duration>,
    stall_after: Option<Duration>,
}

impl IngestConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn mode(mut self, mode: SchedulerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    pub fn fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = Some(timeout);
        self
    }

    pub fn reconnect_attempts(mut self, attempts: usize) -> Self {
        self.reconnect_attempts = Some(attempts);
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn use_upsert(mut self, enabled: bool) -> Self {
        self.use_upsert = Some(enabled);
        self
    }

    pub fn upsert_fallback(mut self, enabled: bool) -> Self {
        self.upsert_fallback = Some(enabled);
        self
    }

    pub fn publish_enabled(mut self, enabled: bool) -> Self {
        self.publish_enabled = Some(enabled);
        self
    }

    pub fn include_receipts(mut self, enabled: bool) -> Self {
        self.include_receipts = Some(enabled);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn max_gap_fill(mut self, span: u64) -> Self {
        self.max_gap_fill = Some(span);
        self
    }

    pub fn start_height(mut self, height: impl Into<BlockHeight>) -> Self {
        self.start_height = Some(height.into());
        self
    }

    pub fn subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = Some(prefix.into());
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    pub fn stall_after(mut self, window: Duration) -> Self {
        self.stall_after = Some(window);
        self
    }

    pub fn build(self) -> Result<IngestConfig> {
        let params = IngestConfigParams {
            rpc_url: self
                .rpc_url
                .ok_or_else(|| invalid("rpc_url is required"))?,
            ws_url: self.ws_url,
            network: self
                .network
                .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            mode: self.mode.unwrap_or_default(),
            polling_interval: self
                .polling_interval
                .unwrap_or(Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS)),
            fallback_timeout: self
                .fallback_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_FALLBACK_TIMEOUT_MS)),
            reconnect_attempts: self
                .reconnect_attempts
                .unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
            reconnect_delay: self
                .reconnect_delay
                .unwrap_or(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)),
            probe_interval: self
                .probe_interval
                .unwrap_or(Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS)),
            handshake_timeout: self
                .handshake_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            retry_attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            retry_delay: self
                .retry_delay
                .unwrap_or(Duration::from_millis(DEFAULT_RETRY_DELAY_MS)),
            use_upsert: self.use_upsert.unwrap_or(true),
            upsert_fallback: self.upsert_fallback.unwrap_or(true),
            publish_enabled: self.publish_enabled.unwrap_or(true),
            include_receipts: self.include_receipts.unwrap_or(false),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            max_gap_fill: self.max_gap_fill.unwrap_or(DEFAULT_MAX_GAP_FILL),
            start_height: self.start_height,
            subject_prefix: self
                .subject_prefix
                .unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_string()),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            shutdown_grace: self
                .shutdown_grace
                .unwrap_or(Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)),
            stall_after: self.stall_after.unwrap_or(telemetry::DEFAULT_STALL_AFTER),
        };

        IngestConfig::new(params)
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|err| {
                    invalid(format!("failed to parse {ENV_PREFIX}{key}='{raw}': {err}"))
                })
            })
            .transpose()
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_millis))
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.string(key)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(format!(
                    "failed to parse {ENV_PREFIX}{key}='{raw}': expected true or false"
                ))),
            })
            .transpose()
            .with_context(|| format!("reading {ENV_PREFIX}{key}"))
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    IngestError::Configuration(message.into()).into()
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn ensure_positive_count(value: usize, field: &str) -> Result<()> {
    if value == 0 {
        return Err(invalid(format!("{field} must be greater than 0")));
    }
    Ok(())
}

fn ensure_positive_duration(value: Duration, field: &str) -> Result<()> {
    if value.is_zero() {
        return Err(invalid(format!("{field} must be greater than 0")));
    }
    Ok(())
}

fn validate_http_url(url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(invalid("rpc_url must start with http:// or https://"));
    }
    Ok(())
}

fn validate_ws_url(url: &str) -> Result<()> {
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(invalid("ws_url must start with ws:// or wss://"));
    }
    Ok(())
}
