use super::{merged_system, tool_result_text, LlmBackend};
use crate::config::ModelConfig;
use crate::llm::LlmResponse;
use async_trait::async_trait;
use serde::Serialize;
use stagehand_core::{Message, Role, StagehandError, StagehandResult, ToolCall, ToolDescriptor};
use std::time::Duration;
use tracing::debug;

/// Claude (Anthropic) API backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// Build a backend for the Anthropic messages API.
    pub fn new(config: ModelConfig) -> StagehandResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StagehandError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> StagehandResult<LlmResponse> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let api_messages: Vec<ClaudeMessage> = messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(ClaudeMessage {
                    role: "user",
                    content: m.content.clone(),
                }),
                Role::Tool => Some(ClaudeMessage {
                    role: "user",
                    content: tool_result_text(m),
                }),
                Role::Assistant => Some(ClaudeMessage {
                    role: "assistant",
                    content: m.content.clone(),
                }),
            })
            .collect();

        let claude_tools: Vec<ClaudeTool> = tools
            .iter()
            .map(|t| ClaudeTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters_schema.clone(),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });

        if let Some(sys) = merged_system(system_prompt, messages) {
            body["system"] = serde_json::json!(sys);
        }

        if !claude_tools.is_empty() && self.config.supports_tools {
            body["tools"] = serde_json::to_value(&claude_tools)?;
        }

        debug!(model = %self.config.model_id, tools = claude_tools.len(), "Anthropic request");

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| StagehandError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| StagehandError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(StagehandError::Backend(format!(
                "Claude API error {status}: {resp_body}"
            )));
        }

        parse_claude_response(&resp_body)
    }

    fn supports_tools(&self) -> bool {
        self.config.supports_tools
    }
}

// -- Claude wire types --

#[derive(Serialize)]
struct ClaudeMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ClaudeTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

/// Map a messages API response body to an [`LlmResponse`].
pub fn parse_claude_response(body: &serde_json::Value) -> StagehandResult<LlmResponse> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| StagehandError::Backend("Missing content in Claude response".into()))?;

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or_default().to_string();
                let name = block["name"].as_str().unwrap_or_default().to_string();
                let arguments = block["input"].clone();
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    if !tool_calls.is_empty() {
        Ok(LlmResponse::ToolUse {
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            tool_calls,
        })
    } else {
        let stop_reason = body["stop_reason"].as_str().unwrap_or("end_turn");
        let text = text_parts.join("\n");
        if stop_reason == "end_turn" {
            Ok(LlmResponse::Done(text))
        } else {
            Ok(LlmResponse::Text(text))
        }
    }
}
