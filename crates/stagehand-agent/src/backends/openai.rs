use super::{merged_system, tool_result_text, LlmBackend};
use crate::config::{LlmProvider, ModelConfig};
use crate::llm::LlmResponse;
use async_trait::async_trait;
use stagehand_core::{Message, Role, StagehandError, StagehandResult, ToolCall, ToolDescriptor};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Build a backend for an OpenAI-compatible chat completions API.
    pub fn new(config: ModelConfig) -> StagehandResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StagehandError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn build_messages(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = merged_system(system_prompt, messages) {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in messages {
            let (role, content) = match m.role {
                Role::System => continue,
                Role::User => ("user", m.content.clone()),
                Role::Tool => ("user", tool_result_text(m)),
                Role::Assistant => ("assistant", m.content.clone()),
            };
            api_messages.push(serde_json::json!({
                "role": role,
                "content": content
            }));
        }

        api_messages
    }

    fn build_tools(&self, tools: &[ToolDescriptor]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        // OpenRouter requires extra headers
        if self.config.provider == LlmProvider::OpenRouter {
            request.header("X-Title", "Stagehand")
        } else {
            request
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> StagehandResult<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let api_messages = self.build_messages(system_prompt, messages);

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });

        if !tools.is_empty() && self.config.supports_tools {
            body["tools"] = serde_json::json!(self.build_tools(tools));
        }

        debug!(model = %self.config.model_id, tools = tools.len(), "OpenAI-compatible request");

        let resp = self
            .add_provider_headers(self.http.post(&url))
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
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        parse_openai_response(&resp_body)
    }

    fn supports_tools(&self) -> bool {
        self.config.supports_tools
    }
}

/// Map a chat completions response body to an [`LlmResponse`].
pub fn parse_openai_response(body: &serde_json::Value) -> StagehandResult<LlmResponse> {
    let choice = body["choices"]
        .get(0)
        .ok_or_else(|| StagehandError::Backend("Missing choices in OpenAI response".into()))?;
    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or_default().to_string();

    if let Some(tool_calls_json) = message["tool_calls"].as_array() {
        let tool_calls: Vec<ToolCall> = tool_calls_json
            .iter()
            .filter_map(|tc| {
                let id = tc["id"].as_str()?.to_string();
                let name = tc["function"]["name"].as_str()?.to_string();
                let arguments: serde_json::Value =
                    serde_json::from_str(tc["function"]["arguments"].as_str()?).unwrap_or_default();
                Some(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect();

        if !tool_calls.is_empty() {
            return Ok(LlmResponse::ToolUse {
                content: if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls,
            });
        }
    }

    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    if finish_reason == "stop" {
        Ok(LlmResponse::Done(content))
    } else {
        Ok(LlmResponse::Text(content))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text() {
        let body = json!({"choices":[{"message":{"content":"hello"},"finish_reason":"stop"}]});
        assert_eq!(
            parse_openai_response(&body).unwrap(),
            LlmResponse::Done("hello".into())
        );
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = json!({"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"speak","arguments":"{\"text\":\"hi\"}"}}
        ]},"finish_reason":"tool_calls"}]});
        match parse_openai_response(&body).unwrap() {
            LlmResponse::ToolUse {
                content,
                tool_calls,
            } => {
                assert!(content.is_none());
                assert_eq!(tool_calls[0].name, "speak");
                assert_eq!(tool_calls[0].arguments["text"], "hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_choices() {
        assert!(parse_openai_response(&json!({"error":"x"})).is_err());
    }

    #[test]
    fn test_build_messages_folds_system_and_tool() {
        let backend = OpenAiBackend::new(ModelConfig::new(LlmProvider::OpenAi, "m")).unwrap();
        let msgs = vec![
            Message::system("memory: likes cats"),
            Message::user("hi"),
            Message::tool("c1", "ok"),
        ];
        let built = backend.build_messages(Some("persona"), &msgs);
        assert_eq!(built.len(), 3);
        assert_eq!(built[0]["content"], "persona\n\nmemory: likes cats");
        assert_eq!(built[2]["role"], "user");
        assert!(built[2]["content"].as_str().unwrap().contains("c1"));
    }
}
