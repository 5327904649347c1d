use crate::prompts;
use crate::rules::{TOOL_RECALL_MEMORY, TOOL_SEND_REPLY, TOOL_SET_EXPRESSION, TOOL_SPEAK};
use crate::summary::strip_summary;
use crate::types::{Backend, Lane, RoutingDecision};
use serde::Serialize;
use serde_json::json;
use stagehand_agent::{LlmBackend, LlmResponse};
use stagehand_core::{
    Event, MemoryService, Message, StagehandError, StagehandResult, ToolCall, ToolDescriptor,
    ToolInvoker, ToolResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Normalized result of a direct-generation dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// Final text with surrounding whitespace trimmed.
    pub text: String,
    /// Names of the offered tools the backend called, in call order.
    pub tools_invoked: Vec<String>,
    /// Rounds in which offered tools were called.
    pub tool_rounds: usize,
    /// Speech was produced, by the backend or by the fallback.
    pub spoke: bool,
    /// The fallback speech call was attempted.
    pub speech_fallback: bool,
}

/// Issues generation calls for decisions that do not spawn an agent.
pub struct BackendDispatcher {
    backends: HashMap<Backend, Arc<dyn LlmBackend>>,
    tools: Option<Arc<dyn ToolInvoker>>,
    memory: Option<Arc<dyn MemoryService>>,
    persona: String,
    max_tool_rounds: usize,
    recall_limit: usize,
}

impl BackendDispatcher {
    /// Dispatcher with no backends, tools or memory.
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            backends: HashMap::new(),
            tools: None,
            memory: None,
            persona: persona.into(),
            max_tool_rounds: 3,
            recall_limit: 5,
        }
    }

    /// Register the client serving `backend`.
    pub fn with_backend(mut self, backend: Backend, client: Arc<dyn LlmBackend>) -> Self {
        self.backends.insert(backend, client);
        self
    }

    /// Enable the tool menu and speech through `tools`.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Enable recalled context and the `recall_memory` tool.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Cap tool rounds and recalled snippets.
    pub fn with_limits(mut self, max_tool_rounds: usize, recall_limit: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self.recall_limit = recall_limit;
        self
    }

    /// Whether a client is registered for `backend`.
    pub fn has_backend(&self, backend: Backend) -> bool {
        self.backends.contains_key(&backend)
    }

    /// Run one generation for `event` under `decision`.
    ///
    /// The tool menu is offered only on the latency-sensitive lane. Calls to
    /// tools outside the menu are answered with an error result and never
    /// executed. Backend failures propagate; tool failures do not.
    pub async fn dispatch(
        &self,
        event: &Event,
        decision: &RoutingDecision,
        lane: Lane,
    ) -> StagehandResult<DispatchResult> {
        let backend = self.backends.get(&decision.backend).ok_or_else(|| {
            StagehandError::Backend(format!("no '{}' backend configured", decision.backend))
        })?;

        let system = prompts::system_prompt(&self.persona, decision);
        let mut messages = Vec::new();
        if let Some(context) = self.recalled_context(event, decision).await {
            messages.push(Message::system(context));
        }
        messages.push(Message::user(prompts::user_content(event)));

        let speech_allowed = event.payload.speak != Some(false);
        let menu = if lane == Lane::LatencySensitive && backend.supports_tools() {
            self.tool_menu(speech_allowed)
        } else {
            Vec::new()
        };

        let mut result = DispatchResult::default();
        let mut speak_requested = false;
        loop {
            let offered: &[ToolDescriptor] = if result.tool_rounds < self.max_tool_rounds {
                &menu
            } else {
                &[]
            };
            let response = backend.chat(Some(&system), &messages, offered).await?;

            match response {
                LlmResponse::ToolUse {
                    content,
                    tool_calls,
                } if !offered.is_empty() && !tool_calls.is_empty() => {
                    result.tool_rounds += 1;
                    messages.push(Message::assistant(content.unwrap_or_default()));
                    for call in tool_calls {
                        if !offered.iter().any(|t| t.name == call.name) {
                            warn!(event_id = %event.id, tool = %call.name, "Backend requested a tool that was not offered");
                            let refused = ToolResult::error(&call.id, "tool not offered");
                            messages.push(Message::tool(call.id, refused.content));
                            continue;
                        }
                        if call.name == TOOL_SPEAK {
                            speak_requested = true;
                        }
                        let outcome = self.execute_tool(event, decision, &call).await;
                        result.tools_invoked.push(call.name.clone());
                        messages.push(Message::tool(call.id, outcome.content));
                    }
                }
                other => {
                    result.text = other.text().trim().to_string();
                    break;
                }
            }
        }

        result.spoke = speak_requested;
        if lane == Lane::LatencySensitive && speech_allowed && !speak_requested {
            let spoken = strip_summary(&result.text);
            if is_speech_worthy(&spoken) {
                result.speech_fallback = true;
                result.spoke = self.speak_fallback(event, &spoken).await;
            }
        }

        info!(
            event_id = %event.id,
            backend = %decision.backend,
            lane = %lane,
            tool_rounds = result.tool_rounds,
            spoke = result.spoke,
            speech_fallback = result.speech_fallback,
            "Dispatch complete"
        );
        Ok(result)
    }

    fn tool_menu(&self, speech_allowed: bool) -> Vec<ToolDescriptor> {
        let mut menu = Vec::new();
        if self.memory.is_some() {
            menu.push(ToolDescriptor::new(
                TOOL_RECALL_MEMORY,
                "Look up remembered context relevant to a query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "partition": {"type": "string"}
                    },
                    "required": ["query"]
                }),
            ));
        }
        if self.tools.is_none() {
            return menu;
        }
        if speech_allowed {
            menu.push(ToolDescriptor::new(
                TOOL_SPEAK,
                "Say the given text out loud.",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            ));
            menu.push(ToolDescriptor::new(
                TOOL_SET_EXPRESSION,
                "Set the avatar's facial expression.",
                json!({
                    "type": "object",
                    "properties": {"expression": {"type": "string"}},
                    "required": ["expression"]
                }),
            ));
        }
        menu.push(ToolDescriptor::new(
            TOOL_SEND_REPLY,
            "Post a reply on the platform the event came from.",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        ));
        menu
    }

    async fn recalled_context(&self, event: &Event, decision: &RoutingDecision) -> Option<String> {
        let memory = self.memory.as_ref()?;
        if self.recall_limit == 0 || event.text().trim().is_empty() {
            return None;
        }
        match memory
            .recall(&decision.memory_partition, event.text(), self.recall_limit)
            .await
        {
            Ok(snippets) if !snippets.is_empty() => {
                let lines: Vec<String> = snippets.iter().map(|s| format!("- {}", s.content)).collect();
                Some(format!("Relevant context:\n{}", lines.join("\n")))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Memory recall failed");
                None
            }
        }
    }

    /// Run one requested tool. Failures become error results, never errors.
    async fn execute_tool(&self, event: &Event, decision: &RoutingDecision, call: &ToolCall) -> ToolResult {
        let outcome = if call.name == TOOL_RECALL_MEMORY {
            self.recall_tool(decision, call).await
        } else {
            match &self.tools {
                Some(tools) => tools
                    .invoke(&call.name, call.arguments.clone())
                    .await
                    .map(|r| ToolResult { call_id: call.id.clone(), ..r }),
                None => Err(StagehandError::ToolInvocation("no tool bridge configured".into())),
            }
        };

        match outcome {
            Ok(result) => {
                if result.is_error {
                    warn!(event_id = %event.id, tool = %call.name, error = %result.content, "Tool reported an error");
                } else {
                    debug!(event_id = %event.id, tool = %call.name, "Tool invoked");
                }
                result
            }
            Err(e) => {
                warn!(event_id = %event.id, tool = %call.name, error = %e, "Tool invocation failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }

    async fn recall_tool(&self, decision: &RoutingDecision, call: &ToolCall) -> StagehandResult<ToolResult> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| StagehandError::ToolInvocation("no memory service".into()))?;
        let query = call.arguments["query"].as_str().unwrap_or_default();
        let partition = call.arguments["partition"]
            .as_str()
            .unwrap_or(&decision.memory_partition);
        let snippets = memory.recall(partition, query, self.recall_limit.max(1)).await?;
        let content = if snippets.is_empty() {
            "nothing remembered".to_string()
        } else {
            snippets
                .iter()
                .map(|s| s.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(ToolResult::success(&call.id, content))
    }

    async fn speak_fallback(&self, event: &Event, text: &str) -> bool {
        let Some(tools) = &self.tools else {
            debug!(event_id = %event.id, "No tool bridge, speech fallback skipped");
            return false;
        };
        match tools.invoke(TOOL_SPEAK, json!({ "text": text })).await {
            Ok(result) if !result.is_error => true,
            Ok(result) => {
                warn!(event_id = %event.id, error = %result.content, "Speech fallback rejected");
                false
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Speech fallback failed");
                false
            }
        }
    }
}

fn is_speech_worthy(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}
