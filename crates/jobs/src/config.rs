// crates/jobs/src/config.rs
//! Worker pool sizing.

use serde::Deserialize;

pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_PROGRESS_BUFFER: usize = 100;

/// Sizing for a [`JobQueue`](crate::JobQueue). Every value is clamped to at
/// least 1 when the queue is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of jobs executing concurrently.
    pub workers: usize,
    /// Submitted jobs buffered before `submit` starts waiting.
    pub queue_capacity: usize,
    /// Aggregate progress updates buffered before new ones are dropped.
    pub progress_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `TICKETSYNC_WORKERS`, `TICKETSYNC_QUEUE_CAPACITY`
    /// and `TICKETSYNC_PROGRESS_BUFFER`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: usize| match lookup(key) {
            None => fallback,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(v) if v > 0 => v,
                _ => {
                    tracing::warn!(key, value = %raw, fallback, "Ignoring invalid queue setting");
                    fallback
                }
            },
        };
        Self {
            workers: read("TICKETSYNC_WORKERS", defaults.workers),
            queue_capacity: read("TICKETSYNC_QUEUE_CAPACITY", defaults.queue_capacity),
            progress_buffer: read("TICKETSYNC_PROGRESS_BUFFER", defaults.progress_buffer),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_progress_buffer(mut self, buffer: usize) -> Self {
        self.progress_buffer = buffer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[]));
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 10);
    }

    #[test]
    fn test_env_overrides() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("TICKETSYNC_WORKERS", "8"),
            ("TICKETSYNC_QUEUE_CAPACITY", " 25 "),
        ]));
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 25);
        assert_eq!(config.progress_buffer, DEFAULT_PROGRESS_BUFFER);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("TICKETSYNC_WORKERS", "0"),
            ("TICKETSYNC_PROGRESS_BUFFER", "lots"),
        ]));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.progress_buffer, DEFAULT_PROGRESS_BUFFER);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: QueueConfig = serde_json::from_str(r#"{"workers": 1}"#).unwrap();
        assert_eq!(config, QueueConfig::default().with_workers(1));
    }
}
