// crates/jobs/src/queue.rs
//! Fixed-size worker pool that runs [`Job`]s off the caller's task.
//!
//! Lifecycle per job:
//!
//! ```text
//! Pending --dequeued--> Running --execute returns--> Completed | Failed | Cancelled
//! Pending --cancel()--> Cancelled                   (execute is never called)
//! ```
//!
//! Status entries are kept for the lifetime of the queue. Progress from every
//! job is fanned into one aggregate stream with drop-on-full sends, so a slow
//! consumer never stalls execution; [`JobQueue::status`] is the ground truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::error::{JobError, QueueError};
use crate::job::Job;
use crate::types::{JobId, JobProgress, JobStatus};

/// State shared between the queue handle and its workers.
#[derive(Default)]
struct QueueState {
    /// Cancellation handles, present only while a job is running.
    handles: HashMap<JobId, CancellationToken>,
    /// Every job ever submitted. Never evicted.
    statuses: HashMap<JobId, JobStatus>,
}

type SharedState = Arc<Mutex<QueueState>>;
type WorkReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Box<dyn Job>>>>;

/// Bounded worker pool with per-job status tracking and cancellation.
///
/// Must be created inside a tokio runtime. Wrap in an `Arc` to share between
/// the UI loop and whatever submits work.
pub struct JobQueue {
    state: SharedState,
    work_tx: Mutex<Option<mpsc::Sender<Box<dyn Job>>>>,
    progress_rx: Mutex<Option<mpsc::Receiver<JobProgress>>>,
    /// Held for the whole drain so concurrent `shutdown` calls wait for it.
    workers: tokio::sync::Mutex<Vec<(usize, JoinHandle<()>)>>,
}

impl JobQueue {
    /// Build the queue and spawn its workers.
    pub fn new(config: &QueueConfig) -> Self {
        let worker_count = config.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (progress_tx, progress_rx) = mpsc::channel(config.progress_buffer.max(1));

        let state = SharedState::default();
        let jobs: WorkReceiver = Arc::new(tokio::sync::Mutex::new(work_rx));

        // Workers hold the only aggregate senders, so the aggregate stream
        // closes once the last worker exits.
        let workers = (0..worker_count)
            .map(|index| {
                let worker = Worker {
                    index,
                    state: Arc::clone(&state),
                    jobs: Arc::clone(&jobs),
                    progress: progress_tx.clone(),
                };
                (index, tokio::spawn(worker.run()))
            })
            .collect();

        tracing::debug!(
            workers = worker_count,
            queue_capacity = config.queue_capacity.max(1),
            progress_buffer = config.progress_buffer.max(1),
            "Job queue started"
        );

        Self {
            state,
            work_tx: Mutex::new(Some(work_tx)),
            progress_rx: Mutex::new(Some(progress_rx)),
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    /// Queue a job for execution and return its id.
    ///
    /// Waits while the queue is at capacity. The job's outcome is observed
    /// through [`status`](Self::status), never through this call.
    pub async fn submit<J: Job>(&self, job: J) -> Result<JobId, QueueError> {
        self.submit_boxed(Box::new(job)).await
    }

    pub async fn submit_boxed(&self, job: Box<dyn Job>) -> Result<JobId, QueueError> {
        let Some(tx) = lock(&self.work_tx).clone() else {
            return Err(QueueError::SubmissionRejected);
        };

        // Reserve first so a caller that gives up while waiting leaves no
        // stale Pending entry behind.
        let permit = tx
            .reserve()
            .await
            .map_err(|_| QueueError::SubmissionRejected)?;

        let id = job.id();
        {
            let mut state = self.state();
            if state.statuses.contains_key(&id) {
                return Err(QueueError::DuplicateJob { id });
            }
            state.statuses.insert(id, JobStatus::Pending);
        }
        tracing::debug!(job_id = %id, job = %job.name(), "Job submitted");
        permit.send(job);
        Ok(id)
    }

    /// Request cancellation.
    ///
    /// A pending job is marked `Cancelled` here and will never execute. For a
    /// running job this only fires its cancellation signal; the worker
    /// records the terminal status once `execute` returns.
    pub fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        let mut state = self.state();
        let status = *state
            .statuses
            .get(&id)
            .ok_or(QueueError::NotFound { id })?;
        if status.is_terminal() {
            return Err(QueueError::NotCancellable { id, status });
        }

        match state.handles.get(&id) {
            Some(token) => {
                token.cancel();
                tracing::info!(job_id = %id, "Cancellation requested for running job");
            }
            None => {
                state.statuses.insert(id, JobStatus::Cancelled);
                tracing::info!(job_id = %id, "Pending job cancelled");
            }
        }
        Ok(())
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.state().statuses.get(&id).copied()
    }

    /// Snapshot of every job this queue has seen.
    pub fn statuses(&self) -> Vec<(JobId, JobStatus)> {
        self.state()
            .statuses
            .iter()
            .map(|(id, status)| (*id, *status))
            .collect()
    }

    /// Ids of jobs that are pending or running.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.state()
            .statuses
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    /// The aggregate progress stream for all jobs. Handed out once.
    ///
    /// Updates are best-effort and dropped when the buffer is full. The
    /// stream ends after [`shutdown`](Self::shutdown) completes.
    pub fn take_progress(&self) -> Option<mpsc::Receiver<JobProgress>> {
        lock(&self.progress_rx).take()
    }

    /// Stop accepting submissions, let workers drain every queued job, and
    /// wait for them to exit. In-flight and queued work is not aborted.
    ///
    /// A call made while another is draining waits for that drain to finish.
    /// Calling it after the queue has stopped is a no-op.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        lock(&self.work_tx).take();
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return Ok(());
        }

        tracing::debug!(workers = workers.len(), "Job queue shutting down");
        let mut result = Ok(());
        // A handle leaves the list only once joined, so a caller that gives
        // up mid-drain leaves the rest for the next `shutdown`.
        while let Some((index, handle)) = workers.first_mut() {
            let index = *index;
            let joined = handle.await;
            workers.remove(0);
            if let Err(source) = joined {
                tracing::error!(worker = index, error = %source, "Worker terminated abnormally");
                if result.is_ok() {
                    result = Err(QueueError::WorkerPanicked {
                        worker: index,
                        source,
                    });
                }
            }
        }
        tracing::debug!("Job queue stopped");
        result
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.state)
    }
}

struct Worker {
    index: usize,
    state: SharedState,
    jobs: WorkReceiver,
    progress: mpsc::Sender<JobProgress>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.jobs.lock().await.recv().await;
            let Some(job) = next else {
                break;
            };
            let span = tracing::info_span!(
                "job",
                job_id = %job.id(),
                job = %job.name(),
                worker = self.index
            );
            self.process(job).instrument(span).await;
        }
        tracing::trace!(worker = self.index, "Worker exiting");
    }

    async fn process(&self, job: Box<dyn Job>) {
        let id = job.id();
        let Some(cancel) = self.start(id) else {
            tracing::debug!("Skipping job cancelled before it started");
            return;
        };

        let forwarder = job
            .take_progress()
            .map(|rx| tokio::spawn(forward_progress(rx, self.progress.clone())));

        // Run on its own task so a panicking job fails instead of killing
        // the worker.
        let job: Arc<dyn Job> = Arc::from(job);
        let token = cancel.clone();
        let result = match tokio::spawn(async move { job.execute(token).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(JobError::failed(format!("job panicked: {join_err}"))),
        };

        if let Some(forwarder) = forwarder {
            match forwarder.await {
                Ok(0) => {}
                Ok(dropped) => tracing::debug!(dropped, "Progress updates dropped, consumer too slow"),
                Err(e) => tracing::warn!(error = %e, "Progress forwarder failed"),
            }
        }

        let status = if cancel.is_cancelled() {
            JobStatus::Cancelled
        } else if result.is_err() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        self.finish(id, status);

        match (status, &result) {
            (JobStatus::Failed, Err(e)) => tracing::warn!(error = %e, "Job failed"),
            (JobStatus::Cancelled, _) => tracing::info!("Job cancelled"),
            _ => tracing::info!("Job completed"),
        }
    }

    /// Register a cancellation handle and mark the job running, unless it
    /// was cancelled while pending.
    fn start(&self, id: JobId) -> Option<CancellationToken> {
        let mut state = lock(&self.state);
        if state.statuses.get(&id) == Some(&JobStatus::Cancelled) {
            return None;
        }
        let cancel = CancellationToken::new();
        state.handles.insert(id, cancel.clone());
        state.statuses.insert(id, JobStatus::Running);
        Some(cancel)
    }

    fn finish(&self, id: JobId, status: JobStatus) {
        let mut state = lock(&self.state);
        state.statuses.insert(id, status);
        state.handles.remove(&id);
    }
}

/// Relay one job's updates into the aggregate stream until the job closes
/// its stream. Returns how many updates were dropped.
async fn forward_progress(
    mut rx: mpsc::Receiver<JobProgress>,
    aggregate: mpsc::Sender<JobProgress>,
) -> u64 {
    let mut dropped = 0;
    while let Some(progress) = rx.recv().await {
        match aggregate.try_send(progress) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => dropped += 1,
            // Nobody is listening; keep draining so the job never blocks.
            Err(TrySendError::Closed(_)) => {}
        }
    }
    dropped
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("Job queue mutex poisoned, recovering");
        poisoned.into_inner()
    })
}
