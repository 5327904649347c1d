//! Direct-generation backends for the Stagehand dispatcher.
//!
//! A backend takes a system prompt, a message set and an optional tool menu
//! and returns either final text or a batch of tool calls. Concrete
//! providers live under [`backends`]; [`LlmClient`] picks one from a
//! [`ModelConfig`].

/// Provider implementations and the [`LlmBackend`] trait.
pub mod backends;
/// Backend connection settings.
pub mod config;
/// Provider selection and the response type.
pub mod llm;

pub use backends::LlmBackend;
pub use config::{LlmProvider, ModelConfig};
pub use llm::{LlmClient, LlmResponse};
