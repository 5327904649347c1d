use crate::backends::claude::ClaudeBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use stagehand_core::{Message, StagehandResult, ToolCall, ToolDescriptor};

/// Response from a backend: text content or a tool call request.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    /// Text returned with a non-terminal stop reason (length cap, filter).
    Text(String),
    /// The model asked for one or more tools to be run.
    ToolUse {
        /// Text emitted alongside the calls.
        content: Option<String>,
        /// Requested calls, in order.
        tool_calls: Vec<ToolCall>,
    },
    /// Text returned with a normal end of turn.
    Done(String),
}

impl LlmResponse {
    /// Textual content regardless of variant.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) | Self::Done(t) => t,
            Self::ToolUse { content, .. } => content.as_deref().unwrap_or_default(),
        }
    }
}

/// Backend client that dispatches to the correct provider.
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
    supports_tools: bool,
}

impl LlmClient {
    /// Build the backend selected by `config.provider`.
    pub fn new(config: ModelConfig) -> StagehandResult<Self> {
        let supports_tools = config.supports_tools;
        let backend: Box<dyn LlmBackend> = match config.provider {
            LlmProvider::Claude => Box::new(ClaudeBackend::new(config)?),
            LlmProvider::OpenAi
            | LlmProvider::OpenRouter
            | LlmProvider::Groq
            | LlmProvider::Ollama => Box::new(OpenAiBackend::new(config)?),
        };
        Ok(Self {
            backend,
            supports_tools,
        })
    }

    /// Create from a pre-built backend (scripted or external providers).
    pub fn from_backend(backend: Box<dyn LlmBackend>) -> Self {
        let supports_tools = backend.supports_tools();
        Self {
            backend,
            supports_tools,
        }
    }

    /// Send one turn. `tools` may be empty.
    pub async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> StagehandResult<LlmResponse> {
        self.backend.chat(system_prompt, messages, tools).await
    }
}

#[async_trait::async_trait]
impl LlmBackend for LlmClient {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> StagehandResult<LlmResponse> {
        LlmClient::chat(self, system_prompt, messages, tools).await
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools && self.backend.supports_tools()
    }
}
