use crate::triggers::TriggerConfig;
use crate::types::Backend;
use serde::{Deserialize, Serialize};
use stagehand_agent::ModelConfig;
use stagehand_core::{StagehandError, StagehandResult};
use stagehand_mcp::ToolServerConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level orchestrator configuration, usually loaded from TOML.
///
/// Every field has a default so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// `[lanes]` concurrency limits.
    pub lanes: LaneConfig,
    /// `[retry]` bound and cadence.
    pub retry: RetryConfig,
    /// `[supervisor]` timeouts, retention and the agent binary.
    pub supervisor: SupervisorConfig,
    /// `[router]` agent routing and context recall.
    pub router: RouterConfig,
    /// `[dispatcher]` tool rounds and recall.
    pub dispatcher: DispatcherConfig,
    /// Direct-generation backends keyed by backend name (`fast_chat`, `creative`).
    pub backends: HashMap<String, ModelConfig>,
    /// `[[tool_servers]]` reachable through the Tool Bridge.
    pub tool_servers: Vec<ToolServerConfig>,
    /// `[[triggers]]` fired on cron schedules.
    pub triggers: Vec<TriggerConfig>,
    /// System prompt persona. Defaults to [`crate::prompts::DEFAULT_PERSONA`].
    pub persona: Option<String>,
    /// Processing records kept by the activity monitor. Zero means the default.
    pub history_limit: usize,
}

/// Concurrency limit per lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    /// Standard lane limit.
    pub standard_concurrency: usize,
    /// Kept at 1 so spoken output never overlaps.
    pub latency_sensitive_concurrency: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            standard_concurrency: 3,
            latency_sensitive_concurrency: 1,
        }
    }
}

/// Retry bound and drain cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt before an event is dropped.
    pub max_retries: u32,
    /// Seconds between drains of the retry table.
    pub interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval_secs: 30,
        }
    }
}

impl RetryConfig {
    /// Drain period.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// How to launch the external reasoning agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentBinaryConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments placed before the generated flags.
    pub args: Vec<String>,
    /// Flag that precedes the comma-separated tool allow-list.
    pub allowed_tools_flag: String,
    /// Flag that precedes `mcp_config_path`.
    pub mcp_config_flag: String,
    /// Tool endpoint document handed to task spawns.
    pub mcp_config_path: Option<PathBuf>,
    /// Flag that precedes `model`.
    pub model_flag: String,
    /// Model name passed to the agent, if any.
    pub model: Option<String>,
    /// Extra environment for every spawn.
    pub env: HashMap<String, String>,
}

impl Default for AgentBinaryConfig {
    fn default() -> Self {
        Self {
            program: "claude".into(),
            args: vec!["--print".into()],
            allowed_tools_flag: "--allowedTools".into(),
            mcp_config_flag: "--mcp-config".into(),
            mcp_config_path: None,
            model_flag: "--model".into(),
            model: None,
            env: HashMap::new(),
        }
    }
}

impl AgentBinaryConfig {
    /// Command-line arguments for a spawn with the given tool allow-list.
    /// Tool flags are only emitted when the list is non-empty.
    pub fn command_args(&self, allowed_tools: &[String]) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(model) = &self.model {
            args.push(self.model_flag.clone());
            args.push(model.clone());
        }
        if !allowed_tools.is_empty() {
            args.push(self.allowed_tools_flag.clone());
            args.push(allowed_tools.join(","));
            if let Some(path) = &self.mcp_config_path {
                args.push(self.mcp_config_flag.clone());
                args.push(path.to_string_lossy().into_owned());
            }
        }
        args
    }
}

/// Worker timeouts, retention and the agent binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Timeout for routing workers.
    pub routing_timeout_secs: u64,
    /// Timeout for task workers.
    pub task_timeout_secs: u64,
    /// Delay between a worker reaching a terminal state and its removal.
    pub removal_grace_secs: u64,
    /// Age after which the cleanup sweep drops terminal workers.
    pub retention_secs: u64,
    /// Time between the graceful terminate signal and the forced kill.
    pub kill_grace_secs: u64,
    /// Seconds between background cleanup sweeps.
    pub cleanup_interval_secs: u64,
    /// Output lines retained per stream.
    pub max_output_lines: usize,
    /// How the reasoning agent is launched.
    pub agent: AgentBinaryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            routing_timeout_secs: 10,
            task_timeout_secs: 120,
            removal_grace_secs: 5,
            retention_secs: 60,
            kill_grace_secs: 3,
            cleanup_interval_secs: 30,
            max_output_lines: 500,
            agent: AgentBinaryConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Routing worker timeout.
    pub fn routing_timeout(&self) -> Duration {
        Duration::from_secs(self.routing_timeout_secs)
    }

    /// Task worker timeout.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Delay before a terminal worker leaves the registry.
    pub fn removal_grace(&self) -> Duration {
        Duration::from_secs(self.removal_grace_secs)
    }

    /// Age at which cleanup drops terminal workers.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Wait between SIGTERM and SIGKILL.
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// Sweep period, at least one second.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Routing engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Ask a tool-less agent worker for the decision before falling back to rules.
    pub use_agent: bool,
    /// Partitions a routing decision may name.
    pub partitions: Vec<String>,
    /// Partition consulted for routing context.
    pub context_partition: String,
    /// Snippets recalled as routing context.
    pub recall_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            use_agent: true,
            partitions: crate::rules::DEFAULT_PARTITIONS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            context_partition: crate::rules::PARTITION_GENERAL.into(),
            recall_limit: 3,
        }
    }
}

/// Direct-generation dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Rounds of tool calls before the menu is withdrawn.
    pub max_tool_rounds: usize,
    /// Snippets recalled as generation context.
    pub recall_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 3,
            recall_limit: 5,
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> StagehandResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| StagehandError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> StagehandResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StagehandError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject limits and references the orchestrator cannot run with.
    pub fn validate(&self) -> StagehandResult<()> {
        if self.lanes.standard_concurrency == 0 || self.lanes.latency_sensitive_concurrency == 0 {
            return Err(StagehandError::Config(
                "lane concurrency limits must be at least 1".into(),
            ));
        }
        if self.retry.interval_secs == 0 {
            return Err(StagehandError::Config("retry.interval_secs must be > 0".into()));
        }
        if self.supervisor.routing_timeout_secs == 0 || self.supervisor.task_timeout_secs == 0 {
            return Err(StagehandError::Config("supervisor timeouts must be > 0".into()));
        }
        if self.supervisor.agent.program.trim().is_empty() {
            return Err(StagehandError::Config("supervisor.agent.program is empty".into()));
        }
        for name in self.backends.keys() {
            let backend: Backend = name.parse().map_err(StagehandError::Config)?;
            if backend.is_spawned() {
                return Err(StagehandError::Config(format!(
                    "backend '{name}' is spawned by the supervisor and takes no model config"
                )));
            }
        }
        for server in &self.tool_servers {
            server.endpoint()?;
        }
        for trigger in &self.triggers {
            crate::triggers::parse_cron(&trigger.cron)?;
        }
        Ok(())
    }

    /// Effective processing-history bound.
    pub fn history_limit(&self) -> usize {
        if self.history_limit == 0 {
            crate::monitor::DEFAULT_HISTORY_LIMIT
        } else {
            self.history_limit
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.lanes.standard_concurrency, 3);
        assert_eq!(config.lanes.latency_sensitive_concurrency, 1);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.supervisor.routing_timeout(), Duration::from_secs(10));
        assert_eq!(config.supervisor.task_timeout(), Duration::from_secs(120));
        assert_eq!(config.supervisor.max_output_lines, 500);
        assert!(config.router.partitions.contains(&"code".to_string()));
    }

    #[test]
    fn test_partial_toml() {
        let raw = r#"
            persona = "You are Mika, a cheerful streamer."

            [lanes]
            standard_concurrency = 5

            [backends.fast_chat]
            provider = "groq"
            model_id = "llama-3.1-8b-instant"
            api_key_env = "GROQ_API_KEY"

            [[tool_servers]]
            name = "tts"
            command = "node"
            args = ["tts.js"]

            [[triggers]]
            name = "morning"
            cron = "0 0 9 * * * *"
            message = "Say good morning to chat"
        "#;
        let config = OrchestratorConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.lanes.standard_concurrency, 5);
        assert_eq!(config.lanes.latency_sensitive_concurrency, 1);
        assert_eq!(config.backends["fast_chat"].model_id, "llama-3.1-8b-instant");
        assert_eq!(config.tool_servers[0].name, "tts");
        assert_eq!(config.triggers[0].name, "morning");
    }

    #[test]
    fn test_validate_rejects_zero_lane() {
        let err = OrchestratorConfig::from_toml_str("[lanes]\nlatency_sensitive_concurrency = 0")
            .unwrap_err();
        assert!(matches!(err, StagehandError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let raw = r#"
            [backends.turbo]
            provider = "openai"
            model_id = "gpt-4o-mini"
        "#;
        assert!(OrchestratorConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn test_command_args_only_add_tools_when_present() {
        let mut agent = AgentBinaryConfig {
            mcp_config_path: Some(PathBuf::from("/tmp/mcp.json")),
            ..Default::default()
        };
        assert_eq!(agent.command_args(&[]), vec!["--print"]);

        agent.model = Some("sonnet".into());
        let args = agent.command_args(&["speak".into(), "send_reply".into()]);
        assert_eq!(
            args,
            vec![
                "--print",
                "--model",
                "sonnet",
                "--allowedTools",
                "speak,send_reply",
                "--mcp-config",
                "/tmp/mcp.json"
            ]
        );
    }
}
