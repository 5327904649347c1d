use crate::supervisor::Completion;
use crate::types::{Backend, Lane, WorkerStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// History bound used when the config leaves it at zero.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Outcome of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Succeeded.
    Completed,
    /// Failed and queued for another attempt.
    Retrying,
    /// Failed with no attempts left.
    Failed,
}

/// One entry in the processing history.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRecord {
    /// Event the attempt belongs to.
    pub event_id: String,
    /// Event source.
    pub source: String,
    /// Event type.
    pub event_type: String,
    /// Lane the attempt ran on.
    pub lane: Lane,
    /// Backend chosen by the router, if routing got that far.
    pub backend: Option<Backend>,
    /// Zero for the first attempt.
    pub attempt: u32,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Wall time of the attempt.
    pub duration_ms: u64,
    /// Failure reason, when the attempt failed.
    pub error: Option<String>,
    /// When the attempt ended.
    pub finished_at: DateTime<Utc>,
}

/// Attempt counters for one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendMetrics {
    /// Attempts routed to the backend.
    pub attempts: u64,
    /// Attempts that completed.
    pub successes: u64,
    /// Failures, including retried ones.
    pub failures: u64,
    /// Summed attempt durations.
    pub total_duration_ms: u64,
}

/// Worker completion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerMetrics {
    /// Workers that exited successfully.
    pub completed: u64,
    /// Workers that failed, timed out or vanished.
    pub failed: u64,
}

#[derive(Default)]
struct MonitorState {
    history: VecDeque<ProcessingRecord>,
    backends: BTreeMap<Backend, BackendMetrics>,
    workers: WorkerMetrics,
}

/// Bounded processing history plus per-backend and worker counters.
pub struct ActivityMonitor {
    state: Arc<RwLock<MonitorState>>,
    limit: usize,
}

impl ActivityMonitor {
    /// Monitor keeping at most `limit` records.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::default())),
            limit: limit.max(1),
        }
    }

    /// Record a finished attempt, evicting the oldest entry past the bound.
    pub async fn record(&self, record: ProcessingRecord) {
        let mut state = self.state.write().await;
        if let Some(backend) = record.backend {
            let metrics = state.backends.entry(backend).or_default();
            metrics.attempts += 1;
            metrics.total_duration_ms += record.duration_ms;
            match record.outcome {
                AttemptOutcome::Completed => metrics.successes += 1,
                AttemptOutcome::Retrying | AttemptOutcome::Failed => metrics.failures += 1,
            }
        }
        if state.history.len() == self.limit {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    /// Count a worker completion notification.
    pub async fn record_worker(&self, completion: &Completion) {
        let mut state = self.state.write().await;
        match completion.status {
            WorkerStatus::Completed => state.workers.completed += 1,
            WorkerStatus::Failed => state.workers.failed += 1,
            WorkerStatus::Running => {}
        }
    }

    /// Newest records first.
    pub async fn history(&self) -> Vec<ProcessingRecord> {
        let state = self.state.read().await;
        state.history.iter().rev().cloned().collect()
    }

    /// Number of records held.
    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// All records for one event, oldest first.
    pub async fn attempts_for(&self, event_id: &str) -> Vec<ProcessingRecord> {
        let state = self.state.read().await;
        state
            .history
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Counters keyed by backend.
    pub async fn backend_metrics(&self) -> BTreeMap<Backend, BackendMetrics> {
        self.state.read().await.backends.clone()
    }

    /// Worker completion counters.
    pub async fn worker_metrics(&self) -> WorkerMetrics {
        self.state.read().await.workers
    }

    /// Serialize the current state as JSON (for status output).
    pub async fn to_json(&self) -> serde_json::Value {
        let state = self.state.read().await;
        let backends: BTreeMap<&str, BackendMetrics> = state
            .backends
            .iter()
            .map(|(backend, metrics)| (backend.as_str(), *metrics))
            .collect();
        serde_json::json!({
            "history_size": state.history.len(),
            "backends": backends,
            "workers": state.workers,
            "recent": state.history.iter().rev().take(10).collect::<Vec<_>>(),
        })
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(id: &str, backend: Backend, outcome: AttemptOutcome) -> ProcessingRecord {
        ProcessingRecord {
            event_id: id.into(),
            source: "chat".into(),
            event_type: "chat_message".into(),
            lane: Lane::Standard,
            backend: Some(backend),
            attempt: 0,
            outcome,
            duration_ms: 10,
            error: None,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let monitor = ActivityMonitor::new(3);
        for i in 0..5 {
            monitor
                .record(record(&format!("e{i}"), Backend::FastChat, AttemptOutcome::Completed))
                .await;
        }
        assert_eq!(monitor.history_len().await, 3);
        assert_eq!(monitor.history().await[0].event_id, "e4");
        assert!(monitor.attempts_for("e0").await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_metrics() {
        let monitor = ActivityMonitor::default();
        monitor.record(record("e1", Backend::FastChat, AttemptOutcome::Completed)).await;
        monitor.record(record("e2", Backend::FastChat, AttemptOutcome::Retrying)).await;
        monitor.record(record("e3", Backend::ReasoningAgent, AttemptOutcome::Failed)).await;

        let metrics = monitor.backend_metrics().await;
        assert_eq!(metrics[&Backend::FastChat].attempts, 2);
        assert_eq!(metrics[&Backend::FastChat].successes, 1);
        assert_eq!(metrics[&Backend::FastChat].failures, 1);
        assert_eq!(metrics[&Backend::ReasoningAgent].total_duration_ms, 10);
    }

    #[tokio::test]
    async fn test_worker_counts_and_json() {
        let monitor = ActivityMonitor::default();
        let completion = Completion {
            instance_id: Uuid::new_v4(),
            event_id: "e1".into(),
            role: "coding".into(),
            status: WorkerStatus::Failed,
            exit_code: Some(1),
            error: Some("exited with code 1".into()),
        };
        monitor.record_worker(&completion).await;
        assert_eq!(monitor.worker_metrics().await.failed, 1);

        monitor.record(record("e1", Backend::Creative, AttemptOutcome::Completed)).await;
        let json = monitor.to_json().await;
        assert_eq!(json["history_size"], 1);
        assert_eq!(json["backends"]["creative"]["successes"], 1);
        assert_eq!(json["workers"]["failed"], 1);
    }
}
