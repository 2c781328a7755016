// crates/jobs/src/adapter.rs
//! [`Job`] adapter for long-running operations that report progress through
//! a callback and do not observe cancellation themselves.
//!
//! The operation runs on its own tokio task. `execute` races that task
//! against the cancellation token:
//! - operation first: its result is stored in the [`JobOutcome`] slot and its
//!   error (if any) is returned as [`JobError::Failed`].
//! - cancellation first: one final "Cancelling..." update is emitted and
//!   [`JobError::Cancelled`] is returned immediately.
//!
//! **Caveat:** on cancellation the operation is *not* aborted. Its task keeps
//! running detached until the wrapped call returns on its own, and that
//! result is discarded. Network calls already in flight may still complete
//! against the tracker, so a cancelled sync can leave partial effects.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::job::{Job, ProgressSender};
use crate::types::{JobId, JobProgress};

/// Slots in each adapted job's progress buffer.
pub const PROGRESS_BUFFER: usize = 32;

/// Message of the synthetic update emitted when cancellation wins the race.
pub const CANCELLING_MESSAGE: &str = "Cancelling...";

/// Progress callback handed to the wrapped operation: `(current, total, message)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

type Launch<T> = Box<dyn FnOnce(ProgressFn) -> JoinHandle<anyhow::Result<T>> + Send>;

/// A [`Job`] wrapping a callback-style operation returning `T`.
pub struct OperationJob<T> {
    id: JobId,
    name: String,
    launch: Mutex<Option<Launch<T>>>,
    progress: ProgressSender,
    progress_rx: Mutex<Option<mpsc::Receiver<JobProgress>>>,
    outcome: JobOutcome<T>,
}

impl<T: Send + 'static> OperationJob<T> {
    /// Wrap an async operation. It is spawned with `tokio::spawn` when the
    /// job executes.
    pub fn new<F, Fut>(name: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(ProgressFn) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_launch(
            name.into(),
            Box::new(move |report| tokio::spawn(op(report))),
        )
    }

    /// Wrap a synchronous operation. It runs on the blocking thread pool
    /// when the job executes.
    pub fn blocking<F>(name: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(ProgressFn) -> anyhow::Result<T> + Send + 'static,
    {
        Self::with_launch(
            name.into(),
            Box::new(move |report| tokio::task::spawn_blocking(move || op(report))),
        )
    }

    fn with_launch(name: String, launch: Launch<T>) -> Self {
        let id = JobId::new();
        let (progress, rx) = ProgressSender::channel(id, PROGRESS_BUFFER);
        Self {
            id,
            name,
            launch: Mutex::new(Some(launch)),
            progress,
            progress_rx: Mutex::new(Some(rx)),
            outcome: JobOutcome::new(),
        }
    }

    /// Handle for fetching the typed result once `execute` has returned.
    ///
    /// Grab it before handing the job to a queue.
    pub fn outcome(&self) -> JobOutcome<T> {
        self.outcome.clone()
    }

    /// Translate callback invocations into progress updates. Becomes a no-op
    /// once `cancel` fires or the stream is closed.
    fn progress_callback(&self, cancel: CancellationToken) -> ProgressFn {
        let progress = self.progress.clone();
        Arc::new(move |current: u64, total: u64, message: &str| {
            if cancel.is_cancelled() {
                return;
            }
            progress.report(current, total, message);
        })
    }
}

#[async_trait]
impl<T: Send + 'static> Job for OperationJob<T> {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn take_progress(&self) -> Option<mpsc::Receiver<JobProgress>> {
        lock(&self.progress_rx).take()
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError> {
        let Some(launch) = lock(&self.launch).take() else {
            self.progress.close();
            return Err(JobError::failed("operation already executed"));
        };

        let mut handle = launch(self.progress_callback(cancel.clone()));

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.progress.report(0, 0, CANCELLING_MESSAGE);
                self.progress.close();
                tracing::warn!(
                    job_id = %self.id,
                    job = %self.name,
                    "Cancelled; wrapped operation keeps running detached and its result will be discarded"
                );
                return Err(JobError::Cancelled);
            }
            joined = &mut handle => joined,
        };
        self.progress.close();

        match joined {
            Ok(Ok(value)) => {
                self.outcome.set_value(value);
                Ok(())
            }
            Ok(Err(e)) => {
                self.outcome.set_error(format!("{e:#}"));
                Err(JobError::Failed(e))
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "operation panicked".to_string()
                } else {
                    format!("operation task aborted: {join_err}")
                };
                tracing::error!(job_id = %self.id, job = %self.name, "{message}");
                self.outcome.set_error(message.clone());
                Err(JobError::failed(message))
            }
        }
    }
}

/// Shared slot holding an [`OperationJob`]'s typed result.
pub struct JobOutcome<T> {
    inner: Arc<Mutex<OutcomeState<T>>>,
}

struct OutcomeState<T> {
    value: Option<T>,
    error: Option<String>,
}

impl<T> JobOutcome<T> {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutcomeState {
                value: None,
                error: None,
            })),
        }
    }

    /// Take the successful result. `None` before completion, after a
    /// failure or cancellation, or if already taken.
    pub fn take(&self) -> Option<T> {
        lock(&self.inner).value.take()
    }

    /// Failure message stored when the operation returned an error.
    pub fn error(&self) -> Option<String> {
        lock(&self.inner).error.clone()
    }

    fn set_value(&self, value: T) {
        lock(&self.inner).value = Some(value);
    }

    fn set_error(&self, message: String) {
        lock(&self.inner).error = Some(message);
    }
}

impl<T> Clone for JobOutcome<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
