use crate::error::StagehandResult;
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Lifecycle status recorded in the persistent event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Admitted, waiting for a lane slot.
    Queued,
    /// A processing attempt is in flight.
    Processing,
    /// Processing finished successfully.
    Completed,
    /// Retries exhausted.
    Failed,
    /// Parked in the retry table.
    Retrying,
}

impl EventStatus {
    /// Whether no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Partial update applied by [`EventStore::update_event`]. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventUpdate {
    /// New lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    /// Backend that handled the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Attempt number being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Final output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventUpdate {
    /// Update that only changes the status.
    pub fn status(status: EventStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set the handling backend.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Set the result text.
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Set the failure reason.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Audit record kept for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The event as first logged.
    pub event: Event,
    /// Latest known status.
    pub status: EventStatus,
    /// Backend label of the latest attempt.
    pub backend: Option<String>,
    /// Latest attempt number.
    pub attempt: u32,
    /// Final textual result, when completed.
    pub result: Option<String>,
    /// Last error message, when any attempt failed.
    pub error: Option<String>,
    /// When the event was first logged.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// Every status this record passed through, in order.
    pub transitions: Vec<EventStatus>,
}

impl EventRecord {
    fn apply(&mut self, update: EventUpdate) {
        if let Some(status) = update.status {
            self.status = status;
            self.transitions.push(status);
        }
        if update.backend.is_some() {
            self.backend = update.backend;
        }
        if let Some(attempt) = update.attempt {
            self.attempt = attempt;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.updated_at = Utc::now();
    }
}

/// Persistent audit trail of event processing.
///
/// The core treats status writes as fire-and-forget: a failing store is
/// logged, never allowed to affect in-memory scheduling.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record a newly admitted event.
    async fn log_event(&self, event: &Event) -> StagehandResult<()>;

    /// Apply a partial update to a previously logged event.
    async fn update_event(&self, id: &str, update: EventUpdate) -> StagehandResult<()>;
}

/// Process-local [`EventStore`] used by the CLI and tests.
pub struct InMemoryEventStore {
    records: RwLock<HashMap<String, EventRecord>>,
    updates: RwLock<Vec<(String, EventUpdate)>>,
}

impl InMemoryEventStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            updates: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: &str) -> Option<EventRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Number of distinct events logged.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been logged yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Every `update_event` call received, in arrival order.
    pub async fn updates(&self) -> Vec<(String, EventUpdate)> {
        self.updates.read().await.clone()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn log_event(&self, event: &Event) -> StagehandResult<()> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        // Re-admission of a finished id starts a fresh record.
        records.insert(
            event.id.clone(),
            EventRecord {
                event: event.clone(),
                status: EventStatus::Queued,
                backend: None,
                attempt: event.attempt,
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
                transitions: vec![EventStatus::Queued],
            },
        );
        Ok(())
    }

    async fn update_event(&self, id: &str, update: EventUpdate) -> StagehandResult<()> {
        self.updates
            .write()
            .await
            .push((id.to_string(), update.clone()));
        let mut records = self.records.write().await;
        // Unknown ids only show up in the call log.
        if let Some(record) = records.get_mut(id) {
            record.apply(update);
        }
        Ok(())
    }
}
