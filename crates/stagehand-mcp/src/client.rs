//! MCP client: performs the handshake and request/response correlation over
//! any [`Transport`].

use crate::config::{Endpoint, ToolServerConfig};
use crate::protocol::*;
use crate::transport::{PendingMap, SseTransport, StdioTransport, Transport};
use parking_lot::Mutex;
use stagehand_core::{StagehandError, StagehandResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

/// MCP client bound to one tool server.
pub struct McpClient {
    transport: Box<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicU64,
    server_name: String,
    request_timeout: Duration,
}

impl McpClient {
    /// Connect using the transport named by `config`, run the handshake and
    /// discover tools.
    pub async fn connect(config: &ToolServerConfig) -> StagehandResult<(Self, Vec<McpToolDef>)> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));

        let transport: Box<dyn Transport> = match config.endpoint()? {
            Endpoint::Stdio { command, args, env } => {
                Box::new(StdioTransport::spawn(command, args, env, pending.clone())?)
            }
            Endpoint::Sse { url } => {
                Box::new(SseTransport::connect(url, pending.clone(), request_timeout).await?)
            }
        };

        let client = Self {
            transport,
            pending,
            next_id: AtomicU64::new(1),
            server_name: config.name.clone(),
            request_timeout,
        };

        let tools = match client.handshake().await {
            Ok(tools) => tools,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        Ok((client, tools))
    }

    async fn handshake(&self) -> StagehandResult<Vec<McpToolDef>> {
        let init_result = self.initialize().await?;
        info!(
            server = %self.server_name,
            version = %init_result.protocol_version,
            "Tool server initialized"
        );

        self.notify("notifications/initialized", None).await?;

        let tools = self.list_tools().await?;
        info!(
            server = %self.server_name,
            tools = tools.len(),
            "Tool server tools discovered"
        );
        Ok(tools)
    }

    /// Send a JSON-RPC request and wait for the response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> StagehandResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.transport.send(&req).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(StagehandError::ToolInvocation(format!(
                    "Tool server '{}' closed before answering '{method}'",
                    self.server_name
                )))
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(StagehandError::timeout(
                    format!("{} {method}", self.server_name),
                    self.request_timeout,
                ));
            }
        };

        if let Some(err) = &resp.error {
            return Err(StagehandError::ToolInvocation(format!(
                "MCP error {}: {}",
                err.code, err.message
            )));
        }

        Ok(resp)
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> StagehandResult<()> {
        let msg = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.transport.send(&msg).await
    }

    /// Perform the MCP initialize handshake.
    async fn initialize(&self) -> StagehandResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "stagehand",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.request("initialize", Some(params)).await?;
        let result = resp
            .result
            .ok_or_else(|| StagehandError::ToolInvocation("Empty initialize result".into()))?;
        Ok(serde_json::from_value(result)?)
    }

    /// List available tools from the server.
    pub async fn list_tools(&self) -> StagehandResult<Vec<McpToolDef>> {
        let resp = self.request("tools/list", None).await?;
        let result = resp
            .result
            .ok_or_else(|| StagehandError::ToolInvocation("Empty tools/list result".into()))?;

        let tools: Vec<McpToolDef> = serde_json::from_value(
            result
                .get("tools")
                .cloned()
                .unwrap_or(serde_json::json!([])),
        )?;
        Ok(tools)
    }

    /// Call a tool on the server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> StagehandResult<McpToolResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self.request("tools/call", Some(params)).await?;
        let result = resp
            .result
            .ok_or_else(|| StagehandError::ToolInvocation("Empty tools/call result".into()))?;
        Ok(serde_json::from_value(result)?)
    }

    /// Name of the server this client talks to.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Whether the transport's inbound side is still open.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Verify the server is responsive by calling `tools/list`.
    pub async fn health_check(&self) -> StagehandResult<()> {
        self.list_tools().await.map(|_| ())
    }

    /// Shut the transport down.
    pub async fn close(&self) {
        self.transport.close().await;
        self.pending.lock().clear();
    }
}
