use serde::{Deserialize, Serialize};
use stagehand_core::{StagehandError, StagehandResult};
use std::collections::HashMap;

/// Configuration for a single tool server.
///
/// Exactly one of `command` (stdio subprocess) or `url` (SSE stream) must be
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Unique server name, used for routing and in the agent config.
    pub name: String,
    /// Program to launch for stdio servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for `command`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for the launched process.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Base URL of an SSE server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Enable auto-reconnect on failure (default: true).
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Health check interval in seconds (default: 60). Set to 0 to disable.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_health_interval() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}

/// How a tool server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint<'a> {
    /// Launched subprocess speaking line-delimited JSON-RPC.
    Stdio {
        /// Program to launch.
        command: &'a str,
        /// Its arguments.
        args: &'a [String],
        /// Extra environment.
        env: &'a HashMap<String, String>,
    },
    /// Remote server reached over server-sent events.
    Sse {
        /// Stream URL.
        url: &'a str,
    },
}

impl ToolServerConfig {
    /// Stdio server launched with `command args...`.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            url: None,
            auto_reconnect: true,
            health_check_interval_secs: default_health_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// SSE server whose event stream lives at `url`.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            auto_reconnect: true,
            health_check_interval_secs: default_health_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Resolve which transport this server uses.
    pub fn endpoint(&self) -> StagehandResult<Endpoint<'_>> {
        match (&self.command, &self.url) {
            (Some(command), None) => Ok(Endpoint::Stdio {
                command,
                args: &self.args,
                env: &self.env,
            }),
            (None, Some(url)) => Ok(Endpoint::Sse { url }),
            (Some(_), Some(_)) => Err(StagehandError::Config(format!(
                "tool server '{}' sets both command and url",
                self.name
            ))),
            (None, None) => Err(StagehandError::Config(format!(
                "tool server '{}' needs a command or a url",
                self.name
            ))),
        }
    }

    /// Entry for the agent-facing `mcpServers` document.
    pub fn agent_entry(&self) -> StagehandResult<serde_json::Value> {
        Ok(match self.endpoint()? {
            Endpoint::Stdio { command, args, env } => serde_json::json!({
                "command": command,
                "args": args,
                "env": env,
            }),
            Endpoint::Sse { url } => serde_json::json!({
                "type": "sse",
                "url": url,
            }),
        })
    }
}
