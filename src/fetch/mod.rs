//! Fetch orchestration: failures, requests, retries and batches.

pub mod batch;
pub mod failure;
pub mod orchestrator;
pub mod request;
pub mod retry;

pub use batch::{BatchCoordinator, BatchError, BatchResult, DEFAULT_MAX_BATCH_SIZE};
pub use failure::{FailureKind, FetchFailure};
pub use orchestrator::RetryOrchestrator;
pub use request::{FetchRequest, FetchResult};
pub use retry::RetryPolicy;
