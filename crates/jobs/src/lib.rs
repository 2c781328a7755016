// crates/jobs/src/lib.rs
//! Background job engine for tracker sync operations.
//!
//! Provides:
//! - `Job` — the contract for cancellable work with a progress stream
//! - `OperationJob` — adapter for callback-style long operations
//! - `JobQueue` — bounded worker pool with status tracking and cancellation
//! - `JobProgress` / `JobStatus` — progress updates and lifecycle states

pub mod adapter;
pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod types;

pub use adapter::{JobOutcome, OperationJob, ProgressFn};
pub use config::QueueConfig;
pub use error::{JobError, QueueError};
pub use job::{Job, ProgressSender};
pub use queue::JobQueue;
pub use types::{format_progress, JobId, JobProgress, JobStatus};

pub use tokio_util::sync::CancellationToken;
