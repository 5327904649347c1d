//! Event orchestration core: classification, routing, supervised workers,
//! dual-lane scheduling and retries.
//!
//! Events arrive through [`Orchestrator::queue_event`], are classified into
//! a lane, routed to a backend (a spawned reasoning agent or a direct
//! generation service), executed under bounded concurrency and retried on a
//! fixed cadence until they succeed or run out of attempts.
//!
//! # Main types
//!
//! - [`Orchestrator`] - Facade wiring every component together.
//! - [`ProcessSupervisor`] - Owns worker processes, timeouts and cleanup.
//! - [`Router`] - Agent-first routing with a deterministic rule fallback.
//! - [`DualLaneScheduler`] - Standard and latency-sensitive bounded lanes.
//! - [`RetryManager`] - Fixed-interval batch retry table.
//! - [`BackendDispatcher`] - Direct generation with a tool menu and speech fallback.
//! - [`ActivityMonitor`] - Bounded processing history and counters.
//! - [`TriggerScheduler`] - Cron triggers that materialize events.

/// Event classification into lanes and content categories.
pub mod classifier;
/// TOML configuration.
pub mod config;
/// Direct-generation dispatch.
pub mod dispatcher;
/// Orchestrator facade and processing pipeline.
pub mod engine;
/// Dual-lane bounded-concurrency scheduler.
pub mod lanes;
/// Processing history and metrics.
pub mod monitor;
/// Instruction payloads for workers and backends.
pub mod prompts;
/// Fixed-interval retry table.
pub mod retry;
/// Routing engine.
pub mod router;
/// Deterministic keyword rules.
pub mod rules;
/// Structured action summary parsing.
pub mod summary;
/// Worker process supervision.
pub mod supervisor;
/// Cron-based event triggers.
pub mod triggers;
/// Shared orchestration types.
pub mod types;

pub use classifier::{classify, Classification, ContentCategory};
pub use config::{
    AgentBinaryConfig, DispatcherConfig, LaneConfig, OrchestratorConfig, RetryConfig,
    RouterConfig, SupervisorConfig,
};
pub use dispatcher::{BackendDispatcher, DispatchResult};
pub use engine::{Admission, Orchestrator, OrchestratorBuilder, StatusSnapshot};
pub use lanes::{DualLaneScheduler, EventProcessor, LaneStats, SchedulerStats};
pub use monitor::{ActivityMonitor, AttemptOutcome, ProcessingRecord};
pub use retry::{RetryEntry, RetryManager, RetryOutcome};
pub use router::{parse_decision, Router};
pub use rules::fallback_decision;
pub use summary::{parse_summary, strip_summary, ActionSummary, Complexity};
pub use supervisor::{
    process_alive, CleanupReport, Completion, ProcessSupervisor, SpawnConfig, SpawnKind,
    SpawnOutcome,
};
pub use triggers::{TriggerConfig, TriggerScheduler};
pub use types::{
    Backend, DecisionSource, Lane, RoutingDecision, WorkerOutput, WorkerSnapshot, WorkerStatus,
};
