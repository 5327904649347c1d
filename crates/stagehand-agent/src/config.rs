use serde::{Deserialize, Serialize};
use stagehand_core::{StagehandError, StagehandResult};

/// Which wire protocol and endpoint a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic messages API.
    Claude,
    /// OpenAI chat completions.
    OpenAi,
    /// OpenRouter, OpenAI-compatible API.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    /// Local Ollama server, OpenAI-compatible API without a key.
    Ollama,
}

/// Connection settings for one direct-generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Wire protocol to use.
    pub provider: LlmProvider,
    /// Provider-specific model name.
    pub model_id: String,
    /// Literal key. Prefer `api_key_env` in config files.
    #[serde(default)]
    pub api_key: String,
    /// Name of an environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the provider's default endpoint.
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Outer bound on one generation request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether the model accepts a structured tool menu.
    #[serde(default = "default_supports_tools")]
    pub supports_tools: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_supports_tools() -> bool {
    true
}

impl ModelConfig {
    /// Minimal config with defaults for everything but provider and model.
    pub fn new(provider: LlmProvider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: String::new(),
            api_key_env: None,
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            supports_tools: default_supports_tools(),
        }
    }

    /// Endpoint to call, explicit or the provider default.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Ollama => "http://localhost:11434",
            }
        }
    }

    /// Fill `api_key` from `api_key_env` when the literal key is empty.
    ///
    /// Ollama needs no key; every other provider fails with a config error
    /// when neither source yields one.
    pub fn resolve_api_key(&mut self) -> StagehandResult<()> {
        if !self.api_key.is_empty() {
            return Ok(());
        }
        if let Some(var) = &self.api_key_env {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {
                    self.api_key = value.trim().to_string();
                    return Ok(());
                }
                _ => {
                    if self.provider != LlmProvider::Ollama {
                        return Err(StagehandError::Config(format!(
                            "environment variable {var} is not set for model {}",
                            self.model_id
                        )));
                    }
                }
            }
        }
        if self.provider == LlmProvider::Ollama {
            return Ok(());
        }
        Err(StagehandError::Config(format!(
            "no api_key or api_key_env for model {}",
            self.model_id
        )))
    }
}
