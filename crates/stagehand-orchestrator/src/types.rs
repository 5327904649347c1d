use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_core::Priority;
use uuid::Uuid;

/// Scheduling track an event is executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Higher concurrency; coding, scheduled and deep-reasoning work.
    Standard,
    /// Concurrency of (typically) one, so spoken output never overlaps.
    LatencySensitive,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Standard => write!(f, "standard"),
            Lane::LatencySensitive => write!(f, "latency_sensitive"),
        }
    }
}

/// Execution strategy selected for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// External reasoning-agent process managed by the supervisor.
    ReasoningAgent,
    /// Low-latency direct generation service.
    FastChat,
    /// Direct generation service tuned for open-ended writing.
    Creative,
}

impl Backend {
    /// Every backend, in declaration order.
    pub const ALL: [Backend; 3] = [Backend::ReasoningAgent, Backend::FastChat, Backend::Creative];

    /// Whether this backend runs as a spawned worker process.
    pub fn is_spawned(self) -> bool {
        matches!(self, Backend::ReasoningAgent)
    }

    /// Snake-case name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::ReasoningAgent => "reasoning_agent",
            Backend::FastChat => "fast_chat",
            Backend::Creative => "creative",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "reasoning_agent" | "reasoning" | "agent" | "deep_reasoning" => {
                Ok(Backend::ReasoningAgent)
            }
            "fast_chat" | "fast" | "chat" => Ok(Backend::FastChat),
            "creative" => Ok(Backend::Creative),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Where a routing decision came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Parsed from a routing worker's structured output.
    Agent,
    /// Produced by the deterministic keyword rules.
    #[default]
    Rules,
}

/// Backend, memory partition and tool set chosen for one processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// Execution strategy.
    pub backend: Backend,
    /// Short label for the kind of work, e.g. `coding` or `chat`.
    #[serde(alias = "use_case")]
    pub use_case: String,
    /// Memory partition used for recall and write-back.
    #[serde(alias = "memory_partition")]
    pub memory_partition: String,
    /// Tool names the executing backend may use.
    #[serde(default, alias = "required_tools")]
    pub required_tools: Vec<String>,
    /// Why this decision was made.
    #[serde(default)]
    pub reason: String,
    /// Carried over from the event unless the router overrode it.
    pub priority: Priority,
    /// Agent output or rules.
    #[serde(default)]
    pub source: DecisionSource,
}

/// Lifecycle of a spawned worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Process started and not yet finished.
    Running,
    /// Exited with status zero.
    Completed,
    /// Non-zero exit, spawn or wait error, timeout or vanished process.
    Failed,
}

impl WorkerStatus {
    /// Completed or failed. A terminal status never changes again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkerStatus::Running)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Completed => write!(f, "completed"),
            WorkerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time copy of a worker instance. The registry itself is never
/// handed out.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    /// Registry id.
    pub id: Uuid,
    /// Event the worker was spawned for.
    pub event_id: String,
    /// `router` for routing workers, the use case for task workers.
    pub role: String,
    /// Worker that spawned this one.
    pub parent_id: Option<Uuid>,
    /// Workers spawned with this one as parent.
    pub children: Vec<Uuid>,
    /// Current lifecycle status.
    pub status: WorkerStatus,
    /// OS process id, once spawned.
    pub pid: Option<u32>,
    /// Exit code, once the process exited.
    pub exit_code: Option<i32>,
    /// Failure reason for failed workers.
    pub error: Option<String>,
    /// Tools the worker was allowed to use.
    pub allowed_tools: Vec<String>,
    /// Timeout applied to the worker.
    pub timeout_secs: u64,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Set on the terminal transition.
    pub ended_at: Option<DateTime<Utc>>,
    /// Lines currently held in the bounded output buffer.
    pub output_lines: usize,
}

/// Output captured from a finished worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerOutput {
    /// Retained stdout lines, newline-joined.
    pub stdout: String,
    /// Retained stderr lines, newline-joined.
    pub stderr: String,
    /// Process exit code, if it exited normally.
    pub exit_code: Option<i32>,
}
