// crates/jobs/src/types.rs
//! Types shared by jobs, the adapter, and the queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Unique identifier for a job, assigned when the job value is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a job.
///
/// `Pending` and `Running` are transient. The other three are terminal and
/// never change once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress update emitted while a job runs.
///
/// Advisory only: updates may be dropped under load, the terminal
/// [`JobStatus`] is the authoritative outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: JobId,
    pub current: u64,
    /// Zero when the total is unknown.
    pub total: u64,
    /// Derived from `current` and `total`, always within `0.0..=100.0`.
    pub percentage: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobProgress {
    pub fn new(job_id: JobId, current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            current,
            total,
            percentage: percentage(current, total),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

fn percentage(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64 * 100.0).min(100.0)
}

/// Render a progress update for display.
///
/// `"<message>: <current>/<total> (<percentage>%)"`, or just the message
/// when the total is unknown.
pub fn format_progress(progress: &JobProgress) -> String {
    progress.to_string()
}

impl fmt::Display for JobProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            return f.write_str(&self.message);
        }
        write!(
            f,
            "{}: {}/{} ({:.0}%)",
            self.message, self.current, self.total, self.percentage
        )
    }
}
