/// Anthropic messages API.
pub mod claude;
/// OpenAI-compatible chat completions.
pub mod openai;

use crate::llm::LlmResponse;
use async_trait::async_trait;
use stagehand_core::{Message, Role, StagehandResult, ToolDescriptor};

/// Trait for direct-generation provider backends.
///
/// Each provider implements this trait to handle API communication. The
/// dispatcher only ever sees `dyn LlmBackend`, so scripted test backends slot
/// in the same way.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single chat completion. An empty `tools` slice means no tool menu.
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> StagehandResult<LlmResponse>;

    /// Whether the backend accepts structured tool calls.
    fn supports_tools(&self) -> bool {
        true
    }
}

/// System prompt plus any system-role messages, joined into one block.
pub(crate) fn merged_system(system_prompt: Option<&str>, messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = system_prompt
        .into_iter()
        .chain(
            messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str()),
        )
        .filter(|s| !s.trim().is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Tool output rendered as plain user text for providers without native
/// tool-result messages in this client.
pub(crate) fn tool_result_text(message: &Message) -> String {
    match &message.tool_call_id {
        Some(id) => format!("[tool result {id}]\n{}", message.content),
        None => message.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_system_joins_blocks() {
        let messages = vec![
            Message::system("Relevant memory: likes jazz"),
            Message::user("hi"),
        ];
        let merged = merged_system(Some("You are Nova."), &messages);
        assert_eq!(
            merged.as_deref(),
            Some("You are Nova.\n\nRelevant memory: likes jazz")
        );
        assert!(merged_system(None, &[Message::user("x")]).is_none());
    }
}
