use crate::client::McpClient;
use crate::config::ToolServerConfig;
use crate::protocol::McpToolDef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use stagehand_core::{
    StagehandError, StagehandResult, ToolDescriptor, ToolInvoker, ToolResult,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RECONNECT_ATTEMPTS: u32 = 5;

/// Status of a managed tool server.
#[derive(Debug, Clone, Serialize)]
pub struct ToolServerStatus {
    /// Server name from the config.
    pub name: String,
    /// Whether a live client is held.
    pub connected: bool,
    /// Tools the server advertised on its last connect.
    pub tool_count: usize,
    /// When the current connection was established.
    pub connected_at: Option<DateTime<Utc>>,
    /// Last health probe, successful or not.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Reconnects since startup.
    pub reconnect_count: usize,
}

struct ManagedServer {
    config: ToolServerConfig,
    client: Arc<McpClient>,
    tools: Vec<McpToolDef>,
    healthy: bool,
    connected_at: DateTime<Utc>,
    last_health_check: Option<DateTime<Utc>>,
    reconnect_count: usize,
}

/// Connection layer to the auxiliary tool services.
///
/// Tool names are resolved to servers in server-name order; the first server
/// exposing a name owns it. Locks are never held across a server round trip.
pub struct ToolBridge {
    configs: Vec<ToolServerConfig>,
    servers: RwLock<BTreeMap<String, ManagedServer>>,
    reconnect_delay: Duration,
}

impl ToolBridge {
    /// Bridge over `configs`. Nothing connects until [`connect_all`](Self::connect_all).
    pub fn new(configs: Vec<ToolServerConfig>) -> Self {
        Self {
            configs,
            servers: RwLock::new(BTreeMap::new()),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Override the initial reconnect backoff delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Connect to every configured server.
    /// Returns the errors for servers that failed to connect.
    pub async fn connect_all(&self) -> Vec<StagehandError> {
        let mut errors = Vec::new();

        for config in &self.configs {
            match self.connect_server(config).await {
                Ok(tool_count) => {
                    info!(server = %config.name, tools = tool_count, "Tool server connected");
                }
                Err(e) => {
                    warn!(server = %config.name, error = %e, "Failed to connect tool server");
                    errors.push(e);
                }
            }
        }

        errors
    }

    async fn connect_server(&self, config: &ToolServerConfig) -> StagehandResult<usize> {
        let (client, tools) = McpClient::connect(config).await?;
        let tool_count = tools.len();

        let previous = self.servers.write().insert(
            config.name.clone(),
            ManagedServer {
                config: config.clone(),
                client: Arc::new(client),
                tools,
                healthy: true,
                connected_at: Utc::now(),
                last_health_check: None,
                reconnect_count: 0,
            },
        );
        if let Some(old) = previous {
            old.client.close().await;
        }
        Ok(tool_count)
    }

    /// Run a health check on every managed server, reconnecting failed ones
    /// when `auto_reconnect` is set.
    pub async fn health_check(&self) {
        let targets: Vec<(String, Arc<McpClient>)> = self
            .servers
            .read()
            .iter()
            .map(|(name, s)| (name.clone(), s.client.clone()))
            .collect();

        for (name, client) in targets {
            let result = client.health_check().await;
            let needs_reconnect = {
                let mut servers = self.servers.write();
                let Some(server) = servers.get_mut(&name) else {
                    continue;
                };
                server.last_health_check = Some(Utc::now());
                match result {
                    Ok(()) => {
                        server.healthy = true;
                        false
                    }
                    Err(e) => {
                        warn!(server = %name, error = %e, "Tool server health check failed");
                        server.healthy = false;
                        server.config.auto_reconnect
                    }
                }
            };

            if needs_reconnect {
                self.reconnect(&name).await;
            }
        }
    }

    async fn reconnect(&self, name: &str) {
        let config = match self.servers.read().get(name) {
            Some(s) => s.config.clone(),
            None => return,
        };

        info!(server = %name, "Attempting tool server reconnection");

        match reconnect_with_backoff(&config, RECONNECT_ATTEMPTS, self.reconnect_delay).await {
            Ok((client, tools)) => {
                let tool_count = tools.len();
                let old = {
                    let mut servers = self.servers.write();
                    servers.get_mut(name).map(|server| {
                        let old = std::mem::replace(&mut server.client, Arc::new(client));
                        server.tools = tools;
                        server.healthy = true;
                        server.connected_at = Utc::now();
                        server.reconnect_count += 1;
                        info!(
                            server = %name,
                            tools = tool_count,
                            reconnects = server.reconnect_count,
                            "Tool server reconnected"
                        );
                        old
                    })
                };
                if let Some(old) = old {
                    old.close().await;
                }
            }
            Err(e) => {
                error!(server = %name, error = %e, "Tool server reconnection failed after retries");
            }
        }
    }

    /// Start a background health check loop, stopped by `cancel`.
    pub fn start_health_loop(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // First tick fires immediately; skip it so checks start after one interval.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => self.health_check().await,
                }
            }
        })
    }

    /// Per-server status, sorted by name.
    pub fn status(&self) -> Vec<ToolServerStatus> {
        let servers = self.servers.read();
        self.configs
            .iter()
            .map(|config| match servers.get(&config.name) {
                Some(s) => ToolServerStatus {
                    name: config.name.clone(),
                    connected: s.healthy,
                    tool_count: s.tools.len(),
                    connected_at: Some(s.connected_at),
                    last_health_check: s.last_health_check,
                    reconnect_count: s.reconnect_count,
                },
                None => ToolServerStatus {
                    name: config.name.clone(),
                    connected: false,
                    tool_count: 0,
                    connected_at: None,
                    last_health_check: None,
                    reconnect_count: 0,
                },
            })
            .collect()
    }

    /// Number of configured servers.
    pub fn server_count(&self) -> usize {
        self.servers.read().len()
    }

    /// Name of the server that owns `tool`, if any.
    pub fn server_for(&self, tool: &str) -> Option<String> {
        self.servers
            .read()
            .iter()
            .find(|(_, s)| s.tools.iter().any(|t| t.name == tool))
            .map(|(name, _)| name.clone())
    }

    /// Write an `mcpServers` document describing every configured server,
    /// for spawned agents to reach the same endpoints.
    pub async fn write_agent_config(&self, path: &Path) -> StagehandResult<()> {
        let mut servers = serde_json::Map::new();
        for config in &self.configs {
            servers.insert(config.name.clone(), config.agent_entry()?);
        }
        let doc = serde_json::json!({ "mcpServers": servers });

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(&doc)?).await?;
        info!(path = %path.display(), servers = self.configs.len(), "Agent tool config written");
        Ok(())
    }

    /// Close every connection.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<McpClient>> = {
            let mut servers = self.servers.write();
            let clients = servers.values().map(|s| s.client.clone()).collect();
            servers.clear();
            clients
        };
        for client in clients {
            client.close().await;
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolBridge {
    async fn list_capabilities(&self) -> Vec<ToolDescriptor> {
        let servers = self.servers.read();
        let mut seen = std::collections::HashSet::new();
        servers
            .values()
            .filter(|s| s.healthy)
            .flat_map(|s| s.tools.iter())
            .filter(|t| seen.insert(t.name.clone()))
            .map(ToolDescriptor::from)
            .collect()
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> StagehandResult<ToolResult> {
        let client = {
            let servers = self.servers.read();
            servers
                .values()
                .find(|s| s.tools.iter().any(|t| t.name == name))
                .map(|s| s.client.clone())
        }
        .ok_or_else(|| StagehandError::NotFound(format!("tool '{name}'")))?;

        let result = client.call_tool(name, arguments).await?;
        let text = result.text();
        Ok(if result.is_error {
            ToolResult::error(name, text)
        } else {
            ToolResult::success(name, text)
        })
    }
}

/// Reconnect to a tool server with exponential backoff.
async fn reconnect_with_backoff(
    config: &ToolServerConfig,
    max_retries: u32,
    initial_delay: Duration,
) -> StagehandResult<(McpClient, Vec<McpToolDef>)> {
    let mut delay = initial_delay;

    for attempt in 1..=max_retries {
        match McpClient::connect(config).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    server = %config.name,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Tool server reconnect failed, retrying"
                );
                if attempt < max_retries {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(60));
                }
            }
        }
    }

    Err(StagehandError::ToolInvocation(format!(
        "Failed to reconnect to tool server '{}' after {max_retries} retries",
        config.name
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status_serialization() {
        let status = ToolServerStatus {
            name: "tts".to_string(),
            connected: true,
            tool_count: 2,
            connected_at: Some(Utc::now()),
            last_health_check: None,
            reconnect_count: 0,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"tts\""));
        assert!(json.contains("tool_count"));
    }

    #[tokio::test]
    async fn test_bridge_empty() {
        let bridge = ToolBridge::new(vec![]);
        assert_eq!(bridge.server_count(), 0);
        assert!(bridge.status().is_empty());
        assert!(bridge.list_capabilities().await.is_empty());
        let err = bridge.invoke("speak", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, StagehandError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_connect_nonexistent_server() {
        let mut config =
            ToolServerConfig::stdio("ghost", "/nonexistent/tool-server", Vec::new());
        config.auto_reconnect = false;
        let bridge = ToolBridge::new(vec![config]);
        let errors = bridge.connect_all().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(bridge.server_count(), 0);
        let status = bridge.status();
        assert_eq!(status.len(), 1);
        assert!(!status[0].connected);
    }
}
