//! Block processing: the shared retry policy, the per-height worker, and the
//! pool that drains the dispatch queue.

pub mod backoff;
pub mod worker;
pub mod worker_pool;

pub use backoff::{BackoffSchedule, RetryPolicy};
pub use worker::{BlockOutcome, BlockWorker, WorkerSettings};
pub use worker_pool::{WorkerPool, WorkerPoolParams};
