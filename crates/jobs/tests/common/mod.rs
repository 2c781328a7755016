//! Shared test jobs for the queue integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use ticketsync_jobs::{
    CancellationToken, Job, JobError, JobId, JobProgress, JobQueue, JobStatus, ProgressSender,
};

/// A job that sleeps `interval` between `steps` progress updates and honours
/// cancellation between steps.
pub struct StepJob {
    id: JobId,
    steps: u64,
    interval: Duration,
    fail: bool,
    progress: ProgressSender,
    progress_rx: Mutex<Option<mpsc::Receiver<JobProgress>>>,
    executions: Arc<AtomicUsize>,
}

impl StepJob {
    pub fn new(steps: u64, interval: Duration) -> Self {
        let id = JobId::new();
        let (progress, rx) = ProgressSender::channel(id, 16);
        Self {
            id,
            steps,
            interval,
            fail: false,
            progress,
            progress_rx: Mutex::new(Some(rx)),
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Counter of `execute` calls, readable after the job is submitted.
    pub fn executions(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.executions)
    }

    async fn run_steps(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        for step in 1..=self.steps {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.progress.report(step, self.steps, "Step");
        }
        if self.fail {
            return Err(JobError::failed("tracker returned 500"));
        }
        Ok(())
    }
}

#[async_trait]
impl Job for StepJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> &str {
        "step"
    }

    fn take_progress(&self) -> Option<mpsc::Receiver<JobProgress>> {
        self.progress_rx.lock().unwrap().take()
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let result = self.run_steps(&cancel).await;
        self.progress.close();
        result
    }
}

/// Poll until `id` reaches a terminal status or `within` elapses.
pub async fn wait_terminal(queue: &JobQueue, id: JobId, within: Duration) -> Option<JobStatus> {
    tokio::time::timeout(within, async {
        loop {
            if let Some(status) = queue.status(id).filter(JobStatus::is_terminal) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .ok()
}

pub async fn drain(mut rx: mpsc::Receiver<JobProgress>) -> Vec<JobProgress> {
    let mut events = Vec::new();
    while let Some(p) = rx.recv().await {
        events.push(p);
    }
    events
}
