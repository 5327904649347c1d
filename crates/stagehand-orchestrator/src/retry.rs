use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use stagehand_core::{Event, StagehandError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An event waiting for the next drain.
#[derive(Debug, Clone, Serialize)]
pub struct RetryEntry {
    /// The clone that will be resubmitted, attempt counter already bumped.
    pub event: Event,
    /// Retries spent, including this one.
    pub retries: u32,
    /// Bound the entry was queued under.
    pub max_retries: u32,
    /// Failure that caused the retry.
    pub last_error: Option<String>,
    /// When the entry was stored.
    pub queued_at: DateTime<Utc>,
}

/// What [`RetryManager::add`] did with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Stored for the next drain as attempt number `attempt`.
    Scheduled {
        /// Attempt number the resubmitted event will carry.
        attempt: u32,
    },
    /// Bound reached; the event is dropped.
    Exhausted {
        /// Attempts made, first one included.
        attempts: u32,
    },
}

/// Bounded, fixed-cadence retry table.
///
/// Entries are keyed by event id; a newer failure for the same id replaces the
/// older entry. The whole table is drained on every tick.
pub struct RetryManager {
    max_retries: u32,
    interval: Duration,
    table: Mutex<HashMap<String, RetryEntry>>,
}

impl RetryManager {
    /// Table allowing `max_retries` retries, drained every `interval`.
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Record a failed attempt of `event`.
    ///
    /// `event.attempt` is the number of retries already spent on it.
    pub fn add(&self, event: &Event, err: &StagehandError) -> RetryOutcome {
        let retries = event.attempt;
        if retries >= self.max_retries {
            error!(
                event_id = %event.id,
                attempts = retries + 1,
                error = %err,
                "Event failed permanently, retries exhausted"
            );
            self.table.lock().remove(&event.id);
            return RetryOutcome::Exhausted {
                attempts: retries + 1,
            };
        }

        let next = event.next_attempt();
        let attempt = next.attempt;
        let previous = self.table.lock().insert(
            event.id.clone(),
            RetryEntry {
                event: next,
                retries: attempt,
                max_retries: self.max_retries,
                last_error: Some(err.to_string()),
                queued_at: Utc::now(),
            },
        );
        if previous.is_some() {
            debug!(event_id = %event.id, "Replaced stale retry entry");
        }
        warn!(
            event_id = %event.id,
            retry = attempt,
            max_retries = self.max_retries,
            error = %err,
            "Event queued for retry"
        );
        RetryOutcome::Scheduled { attempt }
    }

    /// Take every pending entry, leaving the table empty.
    pub fn drain(&self) -> Vec<RetryEntry> {
        let mut entries: Vec<RetryEntry> = self.table.lock().drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.queued_at);
        entries
    }

    /// Drop a pending entry, e.g. when the event succeeded elsewhere.
    pub fn forget(&self, event_id: &str) -> bool {
        self.table.lock().remove(event_id).is_some()
    }

    /// Pending entries.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// No entries pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of the pending entries, unordered.
    pub fn pending(&self) -> Vec<RetryEntry> {
        self.table.lock().values().cloned().collect()
    }

    /// Drain on a fixed interval and hand every event to `sink`.
    pub fn start(
        self: Arc<Self>,
        sink: mpsc::UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        let entries = self.drain();
                        if entries.is_empty() {
                            continue;
                        }
                        info!(count = entries.len(), "Resubmitting retries");
                        for entry in entries {
                            if sink.send(entry.event).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use stagehand_core::{EventPayload, Priority};

    fn event(id: &str) -> Event {
        Event::new("chat", "chat_message", Priority::Medium, EventPayload::message("hi")).with_id(id)
    }

    fn failure() -> StagehandError {
        StagehandError::Backend("503".into())
    }

    #[test]
    fn test_retry_bound() {
        let retry = RetryManager::new(2, Duration::from_secs(1));
        let mut current = event("e1");
        let mut attempts = 1;
        loop {
            match retry.add(&current, &failure()) {
                RetryOutcome::Scheduled { attempt } => {
                    let entries = retry.drain();
                    assert_eq!(entries.len(), 1);
                    assert_eq!(entries[0].retries, attempt);
                    current = entries[0].event.clone();
                    attempts += 1;
                }
                RetryOutcome::Exhausted { attempts: total } => {
                    assert_eq!(total, 3);
                    break;
                }
            }
        }
        assert_eq!(attempts, 3);
        assert!(retry.is_empty());
    }

    #[test]
    fn test_latest_failure_overwrites() {
        let retry = RetryManager::new(3, Duration::from_secs(1));
        retry.add(&event("e1"), &StagehandError::Backend("first".into()));
        retry.add(&event("e1"), &StagehandError::Backend("second".into()));
        retry.add(&event("e2"), &failure());
        assert_eq!(retry.len(), 2);
        let e1 = retry.pending().into_iter().find(|e| e.event.id == "e1").unwrap();
        assert!(e1.last_error.unwrap().contains("second"));
        assert!(retry.forget("e1"));
        assert!(!retry.forget("e1"));
    }

    #[test]
    fn test_zero_retries_exhausts_immediately() {
        let retry = RetryManager::new(0, Duration::from_secs(1));
        assert_eq!(
            retry.add(&event("e1"), &failure()),
            RetryOutcome::Exhausted { attempts: 1 }
        );
        assert!(retry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_drain() {
        let retry = Arc::new(RetryManager::new(3, Duration::from_secs(30)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = retry.clone().start(tx, cancel.clone());

        retry.add(&event("e1"), &failure());
        retry.add(&event("e2"), &failure());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let mut ids = vec![rx.recv().await.unwrap().id, rx.recv().await.unwrap().id];
        ids.sort();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert!(retry.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
