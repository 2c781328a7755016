// crates/jobs/src/error.rs
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Outcome of a job's `execute` when it did not succeed.
#[derive(Debug, Error)]
pub enum JobError {
    /// The cancellation signal caused the early return.
    #[error("Job cancelled")]
    Cancelled,

    /// The job's own logic failed for a reason unrelated to cancellation.
    #[error("Job failed: {0}")]
    Failed(#[source] anyhow::Error),
}

impl JobError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{message}"))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err)
    }
}

/// Errors returned synchronously by queue operations.
///
/// These only describe the operation's own preconditions. A job's eventual
/// outcome is observed through its status.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is shut down, job was not submitted")]
    SubmissionRejected,

    #[error("Job {id} was already submitted to this queue")]
    DuplicateJob { id: JobId },

    #[error("Job not found: {id}")]
    NotFound { id: JobId },

    #[error("Job {id} is already {status} and cannot be cancelled")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error("Worker {worker} terminated abnormally: {source}")]
    WorkerPanicked {
        worker: usize,
        #[source]
        source: tokio::task::JoinError,
    },
}
