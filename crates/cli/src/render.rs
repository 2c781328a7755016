// crates/cli/src/render.rs
//! Terminal rendering of the aggregate progress stream.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use ticketsync_jobs::{format_progress, JobId, JobProgress, JobStatus};
use tokio::sync::mpsc;

/// One progress bar per job, created on the job's first update.
pub struct ProgressView {
    multi: MultiProgress,
    style: ProgressStyle,
    labels: HashMap<JobId, String>,
    bars: HashMap<JobId, ProgressBar>,
}

impl ProgressView {
    pub fn new(labels: HashMap<JobId, String>) -> anyhow::Result<Self> {
        Self::with_target(labels, ProgressDrawTarget::stderr())
    }

    fn with_target(labels: HashMap<JobId, String>, target: ProgressDrawTarget) -> anyhow::Result<Self> {
        let style = ProgressStyle::with_template("  {spinner} {prefix:>6} [{bar:30}] {msg}")?
            .progress_chars("=> ");
        Ok(Self {
            multi: MultiProgress::with_draw_target(target),
            style,
            labels,
            bars: HashMap::new(),
        })
    }

    pub fn apply(&mut self, progress: &JobProgress) {
        let bar = self.bars.entry(progress.job_id).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(progress.total));
            bar.set_style(self.style.clone());
            bar.set_prefix(
                self.labels
                    .get(&progress.job_id)
                    .cloned()
                    .unwrap_or_else(|| "job".to_string()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        if progress.total > 0 {
            bar.set_length(progress.total);
            bar.set_position(progress.current);
        }
        bar.set_message(format_progress(progress));
    }

    /// Consume updates until the queue closes the stream.
    pub async fn follow(&mut self, mut progress: mpsc::Receiver<JobProgress>) {
        while let Some(update) = progress.recv().await {
            self.apply(&update);
        }
    }

    pub fn finish(self) {
        for bar in self.bars.values() {
            bar.finish_and_clear();
        }
    }

    #[cfg(test)]
    fn bar(&self, id: JobId) -> Option<&ProgressBar> {
        self.bars.get(&id)
    }
}

/// Final line for a job, driven by its terminal status.
pub fn summary_line(label: &str, status: JobStatus, error: Option<&str>) -> String {
    match status {
        JobStatus::Completed => format!("✓ {label}: completed"),
        JobStatus::Failed => format!("✗ {label}: failed: {}", error.unwrap_or("unknown error")),
        JobStatus::Cancelled => {
            format!("- {label}: operation cancelled, partial effects possible")
        }
        JobStatus::Pending | JobStatus::Running => format!("? {label}: {status}"),
    }
}
