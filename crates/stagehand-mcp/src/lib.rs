//! Tool Bridge for Stagehand.
//!
//! Speaks MCP (JSON-RPC 2.0) to auxiliary tool services such as speech
//! synthesis, avatar control and platform replies. Servers are reached either
//! as stdio subprocesses or over an SSE event stream; the [`ToolBridge`]
//! routes tool names to servers, keeps them healthy, and implements
//! [`stagehand_core::ToolInvoker`] for the dispatcher.

/// Server routing, health checks and the [`stagehand_core::ToolInvoker`] implementation.
pub mod bridge;
/// MCP session over one transport.
pub mod client;
/// Tool server configuration.
pub mod config;
/// JSON-RPC 2.0 and MCP message types.
pub mod protocol;
/// Stdio and SSE transports.
pub mod transport;

pub use bridge::{ToolBridge, ToolServerStatus};
pub use client::McpClient;
pub use config::ToolServerConfig;
