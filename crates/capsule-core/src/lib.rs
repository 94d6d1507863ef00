//! capsule-core: shared library for the capsule assistant
//!
//! Provides:
//! - Configuration loading (config.toml)
//! - OpenAI chat completion client with function calling
//! - The `CompletionClient` seam the assistant and the authoring pipeline talk through

pub mod config;
pub mod error;
pub mod openai;

use async_trait::async_trait;
use capsule_sdk::FunctionSchema;

pub use config::{AuthoringConfig, Config, LoadPolicy, MemoryConfig, OpenAiConfig, PluginsConfig};
pub use error::CompletionError;
pub use openai::{ChatMessage, Completion, FinishReason, FunctionCall, OpenAiClient, Role};

/// A hosted model that answers a conversation, optionally with a function call
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model name requests are sent to
    fn model(&self) -> &str;

    /// Request one completion for `messages`
    ///
    /// When `functions` is non-empty the model may choose to call one of them.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        functions: &[FunctionSchema],
    ) -> Result<Completion, CompletionError>;
}
