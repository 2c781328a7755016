// crates/jobs/src/job.rs
//! The contract every unit of queued work implements.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::types::{JobId, JobProgress};

/// One unit of asynchronous, cancellable work with its own progress stream.
///
/// Contract for implementors:
/// - `execute` observes `cancel` at bounded intervals and returns
///   [`JobError::Cancelled`] promptly once it fires.
/// - The progress stream is closed before `execute` returns, on every exit
///   path. With [`ProgressSender`] that means calling
///   [`ProgressSender::close`].
/// - Ordinary failures are returned as [`JobError::Failed`], not panics.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn id(&self) -> JobId;

    /// Short label for log fields.
    fn name(&self) -> &str {
        "job"
    }

    /// Hand out the receiving end of this job's progress stream.
    ///
    /// Returns `Some` at most once. The queue is the only consumer.
    fn take_progress(&self) -> Option<mpsc::Receiver<JobProgress>>;

    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError>;
}

/// Producer half of a job's progress stream.
///
/// Clones share one underlying sender, so [`close`](Self::close) on any clone
/// closes the stream for all of them. Sends never block: a full buffer or a
/// closed stream drops the update.
#[derive(Clone)]
pub struct ProgressSender {
    job_id: JobId,
    tx: Arc<Mutex<Option<mpsc::Sender<JobProgress>>>>,
}

impl ProgressSender {
    /// Create a progress stream with room for `capacity` undelivered updates.
    pub fn channel(job_id: JobId, capacity: usize) -> (Self, mpsc::Receiver<JobProgress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = Self {
            job_id,
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (sender, rx)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Emit an update. Returns `false` if it was dropped.
    pub fn report(&self, current: u64, total: u64, message: impl Into<String>) -> bool {
        let guard = self.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(JobProgress::new(self.job_id, current, total, message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(job_id = %self.job_id, "Progress buffer full, update dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the stream. Idempotent.
    pub fn close(&self) {
        self.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<JobProgress>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
