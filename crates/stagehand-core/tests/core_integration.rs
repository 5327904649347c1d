#![allow(clippy::unwrap_used, clippy::expect_used)]

use stagehand_core::*;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// 1. Ingestion-shaped JSON becomes an Event
// ---------------------------------------------------------------------------

#[test]
fn event_from_ingestion_json() {
    let json = serde_json::json!({
        "id": "e1",
        "source": "chat",
        "type": "chat_message",
        "priority": "high",
        "payload": {"message": "fix this null pointer bug", "user": "ana", "thread": 7},
        "requiredTools": ["speak"]
    });

    let event: Event = serde_json::from_value(json).unwrap();
    assert_eq!(event.id, "e1");
    assert_eq!(event.priority, Priority::High);
    assert_eq!(event.payload.user.as_deref(), Some("ana"));
    assert_eq!(event.payload.extra["thread"], 7);
    assert_eq!(event.required_tools, Some(vec!["speak".to_string()]));

    // Serialized form keeps the wire names
    let back = serde_json::to_value(&event).unwrap();
    assert_eq!(back["type"], "chat_message");
    assert_eq!(back["requiredTools"][0], "speak");
}

// ---------------------------------------------------------------------------
// 2. Retry clones never mutate the original
// ---------------------------------------------------------------------------

#[test]
fn retries_are_fresh_clones() {
    let original = Event::new(
        "twitter",
        "mention",
        Priority::Critical,
        EventPayload::message("hello").with_speak(false),
    );
    let third = original.next_attempt().next_attempt();
    assert_eq!(third.attempt, 2);
    assert_eq!(original.attempt, 0);
    assert_eq!(third.payload, original.payload);
}

// ---------------------------------------------------------------------------
// 3. Store and memory collaborators behind trait objects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_through_trait_object() {
    let concrete = Arc::new(InMemoryEventStore::new());
    let store: Arc<dyn EventStore> = concrete.clone();

    let event = Event::new("chat", "chat_message", Priority::Medium, EventPayload::message("x"))
        .with_id("abc");
    store.log_event(&event).await.unwrap();
    store
        .update_event("abc", EventUpdate::status(EventStatus::Processing))
        .await
        .unwrap();
    store
        .update_event(
            "abc",
            EventUpdate::status(EventStatus::Failed).with_error("exit code 1"),
        )
        .await
        .unwrap();

    let record = concrete.get("abc").await.unwrap();
    assert_eq!(record.status, EventStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("exit code 1"));
    assert_eq!(concrete.updates().await.len(), 2);
}

#[tokio::test]
async fn memory_write_back_then_recall() {
    let memory: Arc<dyn MemoryService> = Arc::new(InMemoryMemory::new());
    memory
        .embed(
            "Fixed null pointer in the session parser",
            "code",
            serde_json::json!({"event_id": "e1"}),
        )
        .await
        .unwrap();

    let hits = memory.recall("code", "null pointer", 3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["event_id"], "e1");
    assert_eq!(hits[0].partition, "code");
}

// ---------------------------------------------------------------------------
// 4. Error taxonomy
// ---------------------------------------------------------------------------

#[test]
fn error_taxonomy_display() {
    let cases: Vec<(StagehandError, &str)> = vec![
        (StagehandError::Spawn("claude: not found".into()), "Spawn error"),
        (StagehandError::WorkerFailed("exit 2".into()), "Worker failed"),
        (StagehandError::RoutingParse("missing backend".into()), "Routing parse"),
        (StagehandError::Duplicate("e1".into()), "Duplicate"),
        (
            StagehandError::timeout("await", std::time::Duration::from_millis(1500)),
            "Timeout",
        ),
    ];
    for (err, prefix) in cases {
        assert!(err.to_string().starts_with(prefix), "{err}");
    }
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: StagehandError = io.into();
    assert!(matches!(err, StagehandError::Io(_)));
    assert!(!err.is_worker_failure());
}
