pub mod error;
pub mod model;
pub mod processor;
pub mod publisher;
pub mod rpc;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod subscription;

pub use error::{ingest_error, IngestError};
pub use model::{BlockHeight, BlockId, BlockRecord, TransactionRecord, TxStatus};
pub use processor::{BackoffSchedule, BlockOutcome, BlockWorker, RetryPolicy, WorkerSettings};
pub use publisher::{EventPublisher, EventSink, MemorySink, PublishAck, StreamSettings};
pub use rpc::{ChainLink, ChainRpcClient, FullBlock, RpcError};
pub use runtime::config::{IngestConfig, IngestConfigBuilder, IngestConfigParams};
pub use runtime::pipeline::IngestPipeline;
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, HealthStatus, Telemetry, TelemetrySnapshot};
pub use scheduler::{ArrivalScheduler, SchedulerMode};
pub use storage::{BatchWriteReport, BlockStore, MemoryStore, WriteFailure};
pub use subscription::{ConnectionState, ConnectionSupervisor, SupervisorConfig};
