// crates/cli/src/main.rs
//! ticketsync binary.
//!
//! Runs tracker sync operations on the background job queue and renders
//! their progress. Ctrl-C cancels whatever is still pending or running.

mod ops;
mod render;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ticketsync_jobs::{
    CancellationToken, JobId, JobOutcome, JobQueue, JobStatus, OperationJob, QueueConfig,
};
use tracing_subscriber::EnvFilter;

use ops::{SimulatedTracker, SyncSummary};
use render::{summary_line, ProgressView};

#[derive(Debug, Parser)]
#[command(name = "ticketsync", version, about = "Sync tickets with a remote issue tracker")]
struct Cli {
    /// Concurrent jobs (overrides TICKETSYNC_WORKERS).
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Queued jobs before submission waits (overrides TICKETSYNC_QUEUE_CAPACITY).
    #[arg(long, global = true)]
    queue_capacity: Option<usize>,

    /// Print the final ticket counts as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch tickets from the tracker.
    Pull(TrackerArgs),
    /// Send local ticket changes to the tracker.
    Push(TrackerArgs),
    /// Pull and push concurrently.
    Sync(TrackerArgs),
}

#[derive(Debug, Clone, Args)]
struct TrackerArgs {
    /// Number of tickets to process.
    #[arg(long, default_value_t = 25)]
    tickets: u64,

    /// Simulated round-trip per ticket, in milliseconds.
    #[arg(long, default_value_t = 80)]
    delay_ms: u64,

    /// Make the tracker reject the request halfway through.
    #[arg(long)]
    fail: bool,
}

impl Command {
    fn jobs(&self) -> Vec<(&'static str, OperationJob<SyncSummary>)> {
        let pull = |tracker: SimulatedTracker| {
            ("pull", OperationJob::new("pull", move |report| ops::pull_tickets(tracker, report)))
        };
        let push = |tracker: SimulatedTracker| {
            ("push", OperationJob::new("push", move |report| ops::push_tickets(tracker, report)))
        };
        match self {
            Command::Pull(args) => vec![pull(args.tracker())],
            Command::Push(args) => vec![push(args.tracker())],
            Command::Sync(args) => vec![pull(args.tracker()), push(args.tracker())],
        }
    }
}

impl TrackerArgs {
    fn tracker(&self) -> SimulatedTracker {
        SimulatedTracker {
            tickets: self.tickets,
            delay: Duration::from_millis(self.delay_ms),
            fail_at: self.fail.then_some(self.tickets.div_ceil(2).max(1)),
        }
    }
}

struct Submitted {
    id: JobId,
    label: &'static str,
    outcome: JobOutcome<SyncSummary>,
}

fn queue_config(cli: &Cli) -> QueueConfig {
    let mut config = QueueConfig::from_env();
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(capacity) = cli.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }
    config
}

/// Submit in order, stopping early once `interrupted` fires. A submit
/// blocked on a full queue is abandoned at that point.
async fn submit_all(
    queue: &JobQueue,
    jobs: Vec<(&'static str, OperationJob<SyncSummary>)>,
    interrupted: &CancellationToken,
) -> Result<Vec<Submitted>> {
    let mut submitted = Vec::new();
    for (label, job) in jobs {
        let outcome = job.outcome();
        let id = tokio::select! {
            biased;
            _ = interrupted.cancelled() => {
                tracing::info!(job = label, "Interrupted, not submitting");
                break;
            }
            id = queue.submit(job) => id?,
        };
        submitted.push(Submitted { id, label, outcome });
    }
    Ok(submitted)
}

fn cancel_active(queue: &JobQueue) {
    for id in queue.active_jobs() {
        if let Err(e) = queue.cancel(id) {
            tracing::debug!(job_id = %id, error = %e, "Cancel skipped");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr underneath the progress bars.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ticketsync=info,ticketsync_jobs=info".into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = queue_config(&cli);
    tracing::debug!(?config, "Starting job queue");

    let queue = Arc::new(JobQueue::new(&config));
    let progress = queue
        .take_progress()
        .ok_or_else(|| anyhow::anyhow!("progress stream already taken"))?;

    // Ctrl-C: cancel everything still active, then let the queue drain.
    // Installed before the first submit so an early interrupt is not lost.
    let interrupted = CancellationToken::new();
    let interrupt = tokio::spawn({
        let queue = Arc::clone(&queue);
        let interrupted = interrupted.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling active jobs");
                interrupted.cancel();
                cancel_active(&queue);
            }
        }
    });

    let submitted = submit_all(&queue, cli.command.jobs(), &interrupted).await?;
    if interrupted.is_cancelled() {
        // Covers a job whose submit completed after the handler's sweep.
        cancel_active(&queue);
    }

    let labels: HashMap<JobId, String> = submitted
        .iter()
        .map(|s| (s.id, s.label.to_string()))
        .collect();
    let mut view = ProgressView::new(labels)?;

    // The stream only closes on shutdown, so wait for terminal statuses
    // while rendering, then shut down.
    let ids: Vec<JobId> = submitted.iter().map(|s| s.id).collect();
    let render = tokio::spawn(async move {
        view.follow(progress).await;
        view
    });
    wait_all(&queue, &ids).await;
    queue.shutdown().await?;
    interrupt.abort();
    render.await?.finish();

    let mut totals = SyncSummary::default();
    let mut failed = false;
    for job in &submitted {
        let status = queue
            .status(job.id)
            .ok_or_else(|| anyhow::anyhow!("job {} missing from queue", job.id))?;
        let error = job.outcome.error();
        eprintln!("{}", summary_line(job.label, status, error.as_deref()));
        if let Some(summary) = job.outcome.take() {
            totals.add(&summary);
        }
        failed |= status != JobStatus::Completed;
    }
    eprintln!("\n  {} pulled, {} pushed", totals.pulled, totals.pushed);
    if cli.json {
        println!("{}", serde_json::to_string(&totals)?);
    }

    if failed || interrupted.is_cancelled() {
        anyhow::bail!("not every job completed");
    }
    Ok(())
}

async fn wait_all(queue: &JobQueue, ids: &[JobId]) {
    loop {
        let done = ids
            .iter()
            .all(|id| queue.status(*id).is_some_and(|s| s.is_terminal()));
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_sync() {
        let cli = Cli::try_parse_from([
            "ticketsync",
            "--workers",
            "2",
            "sync",
            "--tickets",
            "10",
            "--fail",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(2));
        let Command::Sync(args) = &cli.command else {
            panic!("expected sync command");
        };
        let tracker = args.tracker();
        assert_eq!(tracker.tickets, 10);
        assert_eq!(tracker.fail_at, Some(5));
        assert_eq!(queue_config(&cli).workers, 2);
        assert!(!cli.json);
        assert_eq!(cli.command.jobs().len(), 2);
    }

    #[test]
    fn test_json_flag_is_global() {
        let cli = Cli::try_parse_from(["ticketsync", "push", "--json"]).unwrap();
        assert!(cli.json);
        let labels: Vec<_> = cli.command.jobs().into_iter().map(|(label, _)| label).collect();
        assert_eq!(labels, vec!["push"]);
    }

    #[tokio::test]
    async fn test_submit_all_stops_once_interrupted() {
        let queue = JobQueue::new(&QueueConfig::default());
        let cli = Cli::try_parse_from(["ticketsync", "sync", "--delay-ms", "1"]).unwrap();

        let interrupted = CancellationToken::new();
        interrupted.cancel();
        let submitted = submit_all(&queue, cli.command.jobs(), &interrupted).await.unwrap();
        assert!(submitted.is_empty());
        assert!(queue.statuses().is_empty());

        let submitted = submit_all(&queue, cli.command.jobs(), &CancellationToken::new())
            .await
            .unwrap();
        let labels: Vec<_> = submitted.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["pull", "push"]);
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_while_blocked_on_full_queue() {
        let queue = JobQueue::new(&QueueConfig::default().with_workers(1).with_queue_capacity(1));
        let cli = Cli::try_parse_from(["ticketsync", "sync", "--tickets", "4", "--delay-ms", "50"])
            .unwrap();
        let first = submit_all(&queue, cli.command.jobs(), &CancellationToken::new())
            .await
            .unwrap();

        // One job running, one queued: the next submit has to wait.
        let interrupted = CancellationToken::new();
        let trigger = interrupted.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let second = submit_all(&queue, cli.command.jobs(), &interrupted).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(queue.statuses().len(), first.len());

        cancel_active(&queue);
        queue.shutdown().await.unwrap();
        for job in &first {
            assert_eq!(queue.status(job.id), Some(JobStatus::Cancelled));
        }
    }

    #[test]
    fn test_tracker_without_failure() {
        let cli = Cli::try_parse_from(["ticketsync", "pull"]).unwrap();
        let Command::Pull(args) = &cli.command else {
            panic!("expected pull command");
        };
        assert_eq!(args.tracker().fail_at, None);
        assert_eq!(args.tracker().delay, Duration::from_millis(80));
    }
}
