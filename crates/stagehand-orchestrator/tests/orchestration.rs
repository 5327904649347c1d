//! End-to-end orchestration tests.
//!
//! Real `sh` processes stand in for the reasoning agent; scripted backends
//! stand in for generation services.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use stagehand_agent::{LlmBackend, LlmResponse};
use stagehand_core::{
    Event, EventPayload, EventStatus, InMemoryEventStore, InMemoryMemory, Message, Priority,
    StagehandError, StagehandResult, ToolDescriptor,
};
use stagehand_orchestrator::*;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn agent(script: &str) -> AgentBinaryConfig {
    AgentBinaryConfig {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
        ..AgentBinaryConfig::default()
    }
}

fn supervisor_with(script: &str, retention_secs: u64) -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorConfig {
        removal_grace_secs: 60,
        retention_secs,
        kill_grace_secs: 1,
        agent: agent(script),
        ..SupervisorConfig::default()
    })
}

struct AlwaysDown {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmBackend for AlwaysDown {
    async fn chat(
        &self,
        _system_prompt: Option<&str>,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> StagehandResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StagehandError::Backend("service unavailable".into()))
    }
}

#[tokio::test]
async fn test_at_most_one_running_worker_per_event() {
    let sup = supervisor_with("sleep 5", 60);
    let mut spawns = JoinSet::new();
    for _ in 0..8 {
        let sup = sup.clone();
        spawns.spawn(async move {
            sup.spawn(SpawnConfig::task("coder", "", vec![]).detached(), "e1", None)
                .await
        });
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    while let Some(result) = spawns.join_next().await {
        match result.unwrap() {
            Ok(_) => accepted += 1,
            Err(StagehandError::Duplicate(_)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 7);
    let running: Vec<_> = sup
        .list()
        .into_iter()
        .filter(|w| w.event_id == "e1" && w.status == WorkerStatus::Running)
        .collect();
    assert_eq!(running.len(), 1);
    assert_eq!(sup.terminate_all(), 1);
}

#[tokio::test]
async fn test_timeout_kills_worker_process() {
    let sup = supervisor_with("sleep 30", 60);
    let err = sup
        .spawn(
            SpawnConfig::task("coder", "", vec![]).with_timeout(Duration::from_millis(300)),
            "e1",
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StagehandError::Timeout { .. }));

    let worker = sup.list().into_iter().next().unwrap();
    assert_eq!(worker.status, WorkerStatus::Failed);
    assert!(!process_alive(worker.pid.unwrap()));

    // The default bound for task spawns.
    let finished = sup
        .spawn(SpawnConfig::task("coder", "", vec![]).detached(), "e2", None)
        .await
        .unwrap();
    assert_eq!(sup.snapshot(finished.instance_id()).unwrap().timeout_secs, 120);
    sup.terminate_all();
}

#[tokio::test]
async fn test_routing_fallback_is_deterministic() {
    let supervisor = ProcessSupervisor::new(SupervisorConfig {
        agent: AgentBinaryConfig {
            program: "/nonexistent/routing-agent".into(),
            ..AgentBinaryConfig::default()
        },
        ..SupervisorConfig::default()
    });
    let router = Router::new(supervisor, None, RouterConfig::default());

    for source in ["chat", "discord", "dashboard", "scheduler", "webhook"] {
        let event = Event::new(
            source,
            "message",
            Priority::Low,
            EventPayload::message("can you debug this function for me"),
        );
        let decision = router.decide(&event).await;
        assert_eq!(decision.backend, Backend::ReasoningAgent, "source {source}");
        assert_eq!(decision.memory_partition, "code", "source {source}");
        assert_eq!(decision.source, DecisionSource::Rules);
        assert_eq!(decision.priority, Priority::Low);
    }
}

#[tokio::test]
async fn test_retry_bound_total_attempts() {
    let mut config = OrchestratorConfig::default();
    config.router.use_agent = false;
    config.retry.max_retries = 2;
    config.retry.interval_secs = 1;
    let backend = Arc::new(AlwaysDown {
        calls: AtomicUsize::new(0),
    });
    let store = Arc::new(InMemoryEventStore::new());
    let orchestrator = Orchestrator::builder(config)
        .store(store.clone())
        .backend(Backend::FastChat, backend.clone())
        .build()
        .unwrap();
    orchestrator.start();

    let event = Event::new("chat", "chat_message", Priority::Medium, EventPayload::message("hey"))
        .with_id("r1");
    assert!(orchestrator.queue_event(event).await.is_accepted());
    assert!(orchestrator.wait_idle(Duration::from_secs(15)).await);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

    // Nothing is resubmitted after exhaustion.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.get("r1").await.unwrap().status, EventStatus::Failed);
    orchestrator.shutdown().await;
}

#[derive(Default)]
struct LaneRecorder {
    current: [AtomicUsize; 2],
    peak: [AtomicUsize; 2],
    done: [AtomicUsize; 2],
}

#[async_trait]
impl EventProcessor for LaneRecorder {
    async fn process(&self, _event: &Event, lane: Lane) -> StagehandResult<()> {
        let i = match lane {
            Lane::Standard => 0,
            Lane::LatencySensitive => 1,
        };
        let now = self.current[i].fetch_add(1, Ordering::SeqCst) + 1;
        self.peak[i].fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(3)).await;
        self.current[i].fetch_sub(1, Ordering::SeqCst);
        self.done[i].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lane_isolation_under_load() {
    let recorder = Arc::new(LaneRecorder::default());
    let scheduler = Arc::new(DualLaneScheduler::new(
        &LaneConfig {
            standard_concurrency: 4,
            latency_sensitive_concurrency: 1,
        },
        recorder.clone(),
        Arc::new(RetryManager::new(0, Duration::from_secs(60))),
    ));

    let mut producers = JoinSet::new();
    for i in 0..50 {
        let scheduler = scheduler.clone();
        producers.spawn(async move {
            let spoken = Event::new(
                "chat",
                "chat_message",
                Priority::Medium,
                EventPayload::message("good morning!").with_speak(true),
            )
            .with_id(format!("spoken-{i}"));
            assert_eq!(scheduler.enqueue(spoken), Lane::LatencySensitive);
            let coding = Event::new(
                "chat",
                "chat_message",
                Priority::Medium,
                EventPayload::message("fix this bug in the parser"),
            )
            .with_id(format!("coding-{i}"));
            assert_eq!(scheduler.enqueue(coding), Lane::Standard);
        });
    }
    while let Some(result) = producers.join_next().await {
        result.unwrap();
    }
    assert!(scheduler.wait_idle(Duration::from_secs(20)).await);

    assert_eq!(recorder.done[0].load(Ordering::SeqCst), 50);
    assert_eq!(recorder.done[1].load(Ordering::SeqCst), 50);
    assert_eq!(recorder.peak[1].load(Ordering::SeqCst), 1);
    assert!(recorder.peak[0].load(Ordering::SeqCst) <= 4);
    let stats = scheduler.stats();
    assert!(stats.latency_sensitive.peak_in_flight <= 1);
    assert_eq!(stats.standard.completed, 50);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let sup = supervisor_with("read line; [ \"$line\" = wait ] && sleep 5; true", 0);
    for id in ["c1", "c2"] {
        sup.spawn(SpawnConfig::task("coder", "done\n", vec![]), id, None)
            .await
            .unwrap();
    }
    let running = sup
        .spawn(SpawnConfig::task("coder", "wait\n", vec![]).detached(), "c3", None)
        .await
        .unwrap();

    let first = sup.cleanup();
    assert_eq!(first.removed, 2);
    assert_eq!(first.reclassified, 0);
    assert_eq!(sup.len(), 1);

    let second = sup.cleanup();
    assert_eq!(second, CleanupReport::default());
    assert_eq!(sup.len(), 1);
    assert_eq!(
        sup.snapshot(running.instance_id()).unwrap().status,
        WorkerStatus::Running
    );
    sup.terminate_all();
}

#[tokio::test]
async fn test_coding_event_end_to_end() {
    let script = r#"cat >/dev/null
echo "Found the null dereference in parse_header and added a guard."
echo '<<<SUMMARY'
echo '{"actions": ["patched parse_header"], "key_info": "null guard added", "response_type": "code_fix", "complexity": "medium"}'
echo 'SUMMARY>>>'"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[supervisor]
removal_grace_secs = 60

[supervisor.agent]
program = "sh"
args = ["-c", {script:?}]
"#,
        script = script
    )
    .unwrap();
    let config = OrchestratorConfig::load(file.path()).unwrap();
    assert_eq!(config.supervisor.task_timeout_secs, 120);

    let store = Arc::new(InMemoryEventStore::new());
    let memory = Arc::new(InMemoryMemory::new());
    let orchestrator = Orchestrator::builder(config)
        .store(store.clone())
        .memory(memory.clone())
        .build()
        .unwrap();
    orchestrator.start();

    let event = Event::new(
        "chat",
        "chat_message",
        Priority::High,
        EventPayload::message("fix this null pointer bug"),
    )
    .with_id("e1");
    let admission = orchestrator.queue_event(event).await;
    assert_eq!(
        admission,
        Admission::Accepted {
            event_id: "e1".into(),
            lane: Lane::Standard
        }
    );
    assert!(orchestrator.wait_idle(Duration::from_secs(20)).await);

    let updates = store.updates().await;
    assert!(updates
        .iter()
        .any(|(id, update)| id == "e1" && update.status == Some(EventStatus::Completed)));
    let record = store.get("e1").await.unwrap();
    assert_eq!(record.status, EventStatus::Completed);
    assert_eq!(record.backend.as_deref(), Some("reasoning_agent"));

    let status = orchestrator.get_status().await;
    let decision = status.last_decision.unwrap();
    assert_eq!(decision.backend, Backend::ReasoningAgent);
    assert_eq!(decision.memory_partition, "code");

    let task_worker = orchestrator
        .supervisor()
        .list()
        .into_iter()
        .find(|w| w.event_id == "e1" && w.role != "router")
        .unwrap();
    assert_eq!(task_worker.timeout_secs, 120);
    assert_eq!(task_worker.status, WorkerStatus::Completed);
    assert_eq!(task_worker.exit_code, Some(0));

    let memories = memory.contents("code").await;
    assert_eq!(memories.len(), 1);
    assert!(memories[0].contains("[code_fix] null guard added"));

    orchestrator.shutdown().await;
}
