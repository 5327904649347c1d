use crate::config::OrchestratorConfig;
use crate::dispatcher::BackendDispatcher;
use crate::lanes::{DualLaneScheduler, EventProcessor, SchedulerStats};
use crate::monitor::{ActivityMonitor, AttemptOutcome, ProcessingRecord};
use crate::prompts::{render_task_prompt, DEFAULT_PERSONA};
use crate::retry::RetryManager;
use crate::router::Router;
use crate::summary::{parse_summary, strip_summary};
use crate::supervisor::{ProcessSupervisor, SpawnConfig, SpawnOutcome};
use crate::triggers::TriggerScheduler;
use crate::types::{Backend, Lane, RoutingDecision};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use stagehand_agent::{LlmBackend, LlmClient};
use stagehand_core::{
    Event, EventStatus, EventStore, EventUpdate, InMemoryEventStore, MemoryService, MemorySnippet,
    StagehandError, StagehandResult, ToolInvoker,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Acknowledgement returned to the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "admission", rename_all = "snake_case")]
pub enum Admission {
    /// Logged and queued on `lane`.
    Accepted {
        /// Id of the admitted event.
        event_id: String,
        /// Lane the event was queued on.
        lane: Lane,
    },
    /// The id is already admitted and not yet finished.
    Duplicate {
        /// Id that was rejected.
        event_id: String,
    },
}

impl Admission {
    /// Id of the submitted event.
    pub fn event_id(&self) -> &str {
        match self {
            Admission::Accepted { event_id, .. } | Admission::Duplicate { event_id } => event_id,
        }
    }

    /// Whether the event was scheduled.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

/// Point-in-time view for `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Per-lane queue and concurrency counters.
    pub lanes: SchedulerStats,
    /// Events waiting for the next retry drain.
    pub retry_queue: usize,
    /// Processing records held by the monitor.
    pub history_size: usize,
    /// Admitted events not yet terminal.
    pub active_events: usize,
    /// Worker processes currently running.
    pub running_workers: usize,
    /// Most recent routing decision.
    pub last_decision: Option<RoutingDecision>,
}

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn EventStore>>,
    memory: Option<Arc<dyn MemoryService>>,
    tools: Option<Arc<dyn ToolInvoker>>,
    backends: HashMap<Backend, Arc<dyn LlmBackend>>,
}

impl OrchestratorBuilder {
    /// Builder over `config` with in-memory defaults.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: None,
            memory: None,
            tools: None,
            backends: HashMap::new(),
        }
    }

    /// Defaults to an [`InMemoryEventStore`].
    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Memory used for context recall and write-back.
    pub fn memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Tool Bridge offered to the dispatcher.
    pub fn tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Use `client` for `backend` instead of building one from config.
    pub fn backend(mut self, backend: Backend, client: Arc<dyn LlmBackend>) -> Self {
        self.backends.insert(backend, client);
        self
    }

    /// Wire every component. Must be called inside a tokio runtime; nothing
    /// runs in the background until [`Orchestrator::start`].
    pub fn build(self) -> StagehandResult<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let persona = config
            .persona
            .clone()
            .unwrap_or_else(|| DEFAULT_PERSONA.to_string());

        let mut dispatcher = BackendDispatcher::new(persona.clone()).with_limits(
            config.dispatcher.max_tool_rounds,
            config.dispatcher.recall_limit,
        );
        for (name, model) in &config.backends {
            let backend: Backend = name.parse().map_err(StagehandError::Config)?;
            if self.backends.contains_key(&backend) {
                continue;
            }
            let mut model = model.clone();
            model.resolve_api_key()?;
            dispatcher = dispatcher.with_backend(backend, Arc::new(LlmClient::new(model)?));
            info!(backend = %backend, "Generation backend configured");
        }
        for (backend, client) in self.backends {
            dispatcher = dispatcher.with_backend(backend, client);
        }
        if let Some(tools) = &self.tools {
            dispatcher = dispatcher.with_tools(tools.clone());
        }
        if let Some(memory) = &self.memory {
            dispatcher = dispatcher.with_memory(memory.clone());
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryEventStore::new()));
        let supervisor = ProcessSupervisor::new(config.supervisor.clone());
        let router = Arc::new(Router::new(
            supervisor.clone(),
            self.memory.clone(),
            config.router.clone(),
        ));
        let monitor = Arc::new(ActivityMonitor::new(config.history_limit()));
        let retry = Arc::new(RetryManager::new(
            config.retry.max_retries,
            config.retry.interval(),
        ));
        let active: ActiveSet = Arc::default();

        let pipeline = Arc::new(Pipeline {
            store: store.clone(),
            memory: self.memory,
            router: router.clone(),
            supervisor: supervisor.clone(),
            dispatcher,
            monitor: monitor.clone(),
            active: active.clone(),
            persona,
            recall_limit: config.dispatcher.recall_limit,
            attempts: Mutex::new(HashMap::new()),
        });
        let scheduler = DualLaneScheduler::new(&config.lanes, pipeline, retry.clone());

        Ok(Orchestrator {
            admission: Arc::new(AdmissionGate {
                scheduler,
                store: store.clone(),
                active,
            }),
            retry,
            supervisor,
            router,
            monitor,
            store,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Dedup, audit log and lane admission, shared with the background forwarders.
struct AdmissionGate {
    scheduler: DualLaneScheduler,
    store: Arc<dyn EventStore>,
    active: ActiveSet,
}

impl AdmissionGate {
    async fn admit(&self, event: Event) -> Admission {
        if !self.active.lock().insert(event.id.clone()) {
            info!(event_id = %event.id, "Duplicate event ignored");
            return Admission::Duplicate { event_id: event.id };
        }
        if let Err(e) = self.store.log_event(&event).await {
            warn!(event_id = %event.id, error = %e, "Event store rejected log_event");
        }
        let event_id = event.id.clone();
        let lane = self.scheduler.enqueue(event);
        info!(event_id = %event_id, lane = %lane, "Event accepted");
        Admission::Accepted { event_id, lane }
    }
}

/// The orchestration core: ingestion, scheduling, routing and execution.
pub struct Orchestrator {
    admission: Arc<AdmissionGate>,
    retry: Arc<RetryManager>,
    supervisor: ProcessSupervisor,
    router: Arc<Router>,
    monitor: Arc<ActivityMonitor>,
    store: Arc<dyn EventStore>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Shorthand for [`OrchestratorBuilder::new`].
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Start the retry drain, cleanup sweep, completion listener and
    /// triggers. Calling it again is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<Event>();
        tasks.push(self.retry.clone().start(retry_tx, self.cancel.clone()));

        let admission = self.admission.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = retry_rx.recv() => match event {
                        Some(event) => {
                            debug!(event_id = %event.id, attempt = event.attempt, "Resubmitting");
                            admission.scheduler.enqueue(event);
                        }
                        None => break,
                    },
                }
            }
        }));

        tasks.push(
            self.supervisor
                .start_cleanup_loop(self.config.supervisor.cleanup_interval(), self.cancel.clone()),
        );

        if let Some(mut completions) = self.supervisor.take_completions() {
            let monitor = self.monitor.clone();
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        completion = completions.recv() => match completion {
                            Some(completion) => monitor.record_worker(&completion).await,
                            None => break,
                        },
                    }
                }
            }));
        }

        let triggers = TriggerScheduler::new(self.config.triggers.clone());
        if !triggers.enabled().is_empty() {
            let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<Event>();
            tasks.push(triggers.start(trigger_tx, self.cancel.clone()));
            let admission = self.admission.clone();
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = trigger_rx.recv() => match event {
                            Some(event) => {
                                admission.admit(event).await;
                            }
                            None => break,
                        },
                    }
                }
            }));
        }

        info!(
            standard = self.config.lanes.standard_concurrency,
            latency_sensitive = self.config.lanes.latency_sensitive_concurrency,
            max_retries = self.config.retry.max_retries,
            triggers = self.config.triggers.len(),
            "Orchestrator started"
        );
    }

    /// Admit an event. Always answers immediately; processing outcome is
    /// visible only through [`Orchestrator::get_status`] and the store.
    pub async fn queue_event(&self, event: Event) -> Admission {
        self.admission.admit(event).await
    }

    /// Counters and the last routing decision.
    pub async fn get_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            lanes: self.admission.scheduler.stats(),
            retry_queue: self.retry.len(),
            history_size: self.monitor.history_len().await,
            active_events: self.admission.active.lock().len(),
            running_workers: self.supervisor.running_count(),
            last_decision: self.router.last_decision(),
        }
    }

    /// Apply new lane limits without dropping admitted work.
    pub fn reconfigure_lanes(&self, lanes: &crate::config::LaneConfig) {
        self.admission.scheduler.reconfigure(lanes);
    }

    /// Wait until no event is queued, running or waiting for a retry.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if self.admission.scheduler.wait_idle(remaining).await
                && self.retry.is_empty()
                && self.admission.active.lock().is_empty()
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop background loops and kill every tracked worker.
    /// Returns the number of workers that were still running.
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();
        let killed = self.supervisor.terminate_all();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }
        info!(killed, "Orchestrator stopped");
        killed
    }

    /// Worker process supervisor.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Activity history and counters.
    pub fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }

    /// Event audit store.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Retry table.
    pub fn retry(&self) -> &Arc<RetryManager> {
        &self.retry
    }

    /// Configuration the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

struct AttemptInfo {
    lane: Lane,
    backend: Option<Backend>,
    started: Instant,
}

/// One processing attempt: route, execute, write back.
struct Pipeline {
    store: Arc<dyn EventStore>,
    memory: Option<Arc<dyn MemoryService>>,
    router: Arc<Router>,
    supervisor: ProcessSupervisor,
    dispatcher: BackendDispatcher,
    monitor: Arc<ActivityMonitor>,
    active: ActiveSet,
    persona: String,
    recall_limit: usize,
    attempts: Mutex<HashMap<String, AttemptInfo>>,
}

impl Pipeline {
    async fn update(&self, event: &Event, update: EventUpdate) {
        if let Err(e) = self.store.update_event(&event.id, update).await {
            warn!(event_id = %event.id, error = %e, "Event store rejected update_event");
        }
    }

    async fn recall(&self, event: &Event, decision: &RoutingDecision) -> Vec<MemorySnippet> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        if self.recall_limit == 0 {
            return Vec::new();
        }
        memory
            .recall(&decision.memory_partition, event.text(), self.recall_limit)
            .await
            .unwrap_or_else(|e| {
                debug!(event_id = %event.id, error = %e, "Context recall failed");
                Vec::new()
            })
    }

    async fn run_agent(&self, event: &Event, decision: &RoutingDecision) -> StagehandResult<String> {
        let snippets = self.recall(event, decision).await;
        let prompt = render_task_prompt(&self.persona, event, decision, &snippets);
        let config = SpawnConfig::task(
            decision.use_case.clone(),
            prompt,
            decision.required_tools.clone(),
        );
        match self.supervisor.spawn(config, &event.id, None).await? {
            SpawnOutcome::Finished { output, .. } => Ok(output.stdout),
            SpawnOutcome::Detached(id) => Err(StagehandError::WorkerFailed(format!(
                "task worker {id} detached unexpectedly"
            ))),
        }
    }

    async fn write_back(&self, event: &Event, decision: &RoutingDecision, output: &str) {
        let Some(memory) = &self.memory else {
            return;
        };
        let summary = parse_summary(output);
        let content = match &summary {
            Some(summary) => summary.to_memory_text(),
            None => strip_summary(output),
        };
        if content.trim().is_empty() {
            return;
        }
        let metadata = json!({
            "event_id": event.id,
            "source": event.source,
            "use_case": decision.use_case,
            "backend": decision.backend.as_str(),
            "structured": summary.is_some(),
            "response_type": summary.as_ref().map(|s| s.response_type.clone()),
        });
        if let Err(e) = memory
            .embed(&content, &decision.memory_partition, metadata)
            .await
        {
            warn!(event_id = %event.id, error = %e, "Memory write-back failed");
        }
    }

    async fn finish_attempt(
        &self,
        event: &Event,
        outcome: AttemptOutcome,
        error: Option<&StagehandError>,
    ) {
        let info = self.attempts.lock().remove(&event.id);
        let (lane, backend, duration_ms) = match info {
            Some(info) => (
                info.lane,
                info.backend,
                u64::try_from(info.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ),
            None => (Lane::Standard, None, 0),
        };
        self.monitor
            .record(ProcessingRecord {
                event_id: event.id.clone(),
                source: event.source.clone(),
                event_type: event.event_type.clone(),
                lane,
                backend,
                attempt: event.attempt,
                outcome,
                duration_ms,
                error: error.map(ToString::to_string),
                finished_at: Utc::now(),
            })
            .await;
    }
}

#[async_trait]
impl EventProcessor for Pipeline {
    async fn process(&self, event: &Event, lane: Lane) -> StagehandResult<()> {
        self.attempts.lock().insert(
            event.id.clone(),
            AttemptInfo {
                lane,
                backend: None,
                started: Instant::now(),
            },
        );
        self.update(
            event,
            EventUpdate::status(EventStatus::Processing).with_attempt(event.attempt),
        )
        .await;

        let decision = self.router.decide(event).await;
        if let Some(info) = self.attempts.lock().get_mut(&event.id) {
            info.backend = Some(decision.backend);
        }

        let output = if decision.backend.is_spawned() {
            self.run_agent(event, &decision).await?
        } else {
            self.dispatcher.dispatch(event, &decision, lane).await?.text
        };

        self.write_back(event, &decision, &output).await;
        self.update(
            event,
            EventUpdate::status(EventStatus::Completed)
                .with_backend(decision.backend.as_str())
                .with_attempt(event.attempt)
                .with_result(strip_summary(&output)),
        )
        .await;
        self.finish_attempt(event, AttemptOutcome::Completed, None).await;
        self.active.lock().remove(&event.id);
        info!(
            event_id = %event.id,
            lane = %lane,
            backend = %decision.backend,
            attempt = event.attempt,
            "Event completed"
        );
        Ok(())
    }

    async fn on_retry_scheduled(&self, event: &Event, attempt: u32, error: &StagehandError) {
        self.update(
            event,
            EventUpdate::status(EventStatus::Retrying)
                .with_attempt(attempt)
                .with_error(error.to_string()),
        )
        .await;
        self.finish_attempt(event, AttemptOutcome::Retrying, Some(error)).await;
    }

    async fn on_exhausted(&self, event: &Event, error: &StagehandError) {
        self.update(
            event,
            EventUpdate::status(EventStatus::Failed)
                .with_attempt(event.attempt)
                .with_error(error.to_string()),
        )
        .await;
        self.finish_attempt(event, AttemptOutcome::Failed, Some(error)).await;
        self.active.lock().remove(&event.id);
        error!(event_id = %event.id, error = %error, "Event failed");
    }
}
