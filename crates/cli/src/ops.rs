// crates/cli/src/ops.rs
//! Simulated tracker operations.
//!
//! Stand-ins for the real pull/push calls: callback-style progress, no
//! cancellation awareness, one fixed delay per ticket.

use std::time::Duration;

use anyhow::bail;
use serde::Serialize;
use ticketsync_jobs::ProgressFn;

/// How the simulated tracker behaves.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedTracker {
    pub tickets: u64,
    pub delay: Duration,
    /// Ticket number at which the tracker starts rejecting requests.
    pub fail_at: Option<u64>,
}

/// Ticket counts for a run. Printed as JSON with `--json`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub pulled: u64,
    pub pushed: u64,
}

impl SyncSummary {
    pub fn add(&mut self, other: &SyncSummary) {
        self.pulled += other.pulled;
        self.pushed += other.pushed;
    }
}

pub async fn pull_tickets(tracker: SimulatedTracker, report: ProgressFn) -> anyhow::Result<SyncSummary> {
    report(0, tracker.tickets, "Connecting to tracker");
    for n in 1..=tracker.tickets {
        tokio::time::sleep(tracker.delay).await;
        if tracker.fail_at == Some(n) {
            bail!("tracker returned 502 while fetching ticket #{n}");
        }
        report(n, tracker.tickets, "Pulling tickets");
    }
    tracing::debug!(tickets = tracker.tickets, "Pull finished");
    Ok(SyncSummary {
        pulled: tracker.tickets,
        pushed: 0,
    })
}

pub async fn push_tickets(tracker: SimulatedTracker, report: ProgressFn) -> anyhow::Result<SyncSummary> {
    for n in 1..=tracker.tickets {
        tokio::time::sleep(tracker.delay).await;
        if tracker.fail_at == Some(n) {
            bail!("tracker rejected update for ticket #{n}: validation failed");
        }
        report(n, tracker.tickets, "Pushing tickets");
    }
    tracing::debug!(tickets = tracker.tickets, "Push finished");
    Ok(SyncSummary {
        pulled: 0,
        pushed: tracker.tickets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<(u64, u64, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let report: ProgressFn = Arc::new(move |current: u64, total: u64, message: &str| {
            sink.lock().unwrap().push((current, total, message.to_string()));
        });
        (report, seen)
    }

    fn tracker(fail_at: Option<u64>) -> SimulatedTracker {
        SimulatedTracker {
            tickets: 3,
            delay: Duration::from_millis(1),
            fail_at,
        }
    }

    #[tokio::test]
    async fn test_pull_reports_each_ticket() {
        let (report, seen) = recorder();
        let summary = pull_tickets(tracker(None), report).await.unwrap();
        assert_eq!(summary.pulled, 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (0, 3, "Connecting to tracker".to_string()));
        assert_eq!(seen[3], (3, 3, "Pulling tickets".to_string()));
    }

    #[tokio::test]
    async fn test_push_fails_at_configured_ticket() {
        let (report, seen) = recorder();
        let err = push_tickets(tracker(Some(2)), report).await.unwrap_err();
        assert!(err.to_string().contains("ticket #2"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_summary_totals_serialize() {
        let mut totals = SyncSummary::default();
        totals.add(&SyncSummary { pulled: 3, pushed: 0 });
        totals.add(&SyncSummary { pulled: 0, pushed: 2 });
        assert_eq!(
            serde_json::to_string(&totals).unwrap(),
            r#"{"pulled":3,"pushed":2}"#
        );
    }
}
