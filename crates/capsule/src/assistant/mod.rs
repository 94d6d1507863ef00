//! The assistant: one session, one registry, one model
//!
//! [`Assistant`] serializes turns through its session lock, so `message` and
//! `reset` from different tasks never interleave.

mod dispatch;
mod state;

use std::sync::Arc;

use capsule_core::{ChatMessage, CompletionClient};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::plugins::Registry;
use crate::session::Session;

pub use dispatch::{DispatchError, Dispatcher};
pub use state::{AssistantConfig, DispatchState};

/// Default system prompt
pub const SYSTEM_PROMPT: &str = "\
You are Capsule, a versatile assistant that works through a set of plugins.

Before anything else, call the memory plugin with the hydrate action to recall \
what you already know about the user and their preferences.

Use plugins on their own for simple tasks and chain several of them for harder \
ones. For example, when told \"tomorrow I need to do x\", get the date from a \
date plugin and save the task with the memory plugin.

Store details worth keeping, such as the user's name or an important date, and \
save the situation in which you learned them along with the fact itself.

When no plugin can do what is asked, use create-plugin to write a new one. \
Describe its purpose, arguments and result in full. A new plugin is only \
available after the assistant restarts.";

pub struct Assistant {
    client: Arc<dyn CompletionClient>,
    registry: Arc<Registry>,
    config: AssistantConfig,
    session: Mutex<Session>,
}

impl Assistant {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: Arc<Registry>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            session: Mutex::new(Session::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(
            self.client.as_ref(),
            &self.registry,
            self.config.max_chain_depth,
        )
    }

    /// Send one user message and return the model's answer
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn message(&self, text: &str) -> Result<String, DispatchError> {
        let mut session = self.session.lock().await;
        session.push(ChatMessage::user(text));

        let state = self.dispatcher().run(&mut session).await?;
        Ok(state.final_response.unwrap_or_default())
    }

    /// Start over: system prompt only, then the model's acknowledgement
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<String, DispatchError> {
        let mut session = self.session.lock().await;
        session.reset();
        session.push(ChatMessage::system(self.config.system_prompt.clone()));

        let state = self.dispatcher().run(&mut session).await?;
        info!(session = %session.id, calls = state.depth(), "Conversation restarted");
        Ok(state.final_response.unwrap_or_default())
    }

    /// Copy of the current session
    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AddCapability, ScriptedClient};
    use capsule_core::{Completion, Role};

    fn assistant(client: Arc<ScriptedClient>, registry: Registry) -> Assistant {
        Assistant::new(client, Arc::new(registry), AssistantConfig::default())
    }

    #[tokio::test]
    async fn test_message_returns_answer() {
        let client = ScriptedClient::new(vec![Completion::stop("hello")]);
        let assistant = assistant(client, Registry::default());

        assert_eq!(assistant.message("hi").await.unwrap(), "hello");

        let session = assistant.snapshot().await;
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0].role, Role::User);
        assert_eq!(session.messages()[1].content, "hello");
    }

    #[tokio::test]
    async fn test_reset_discards_prior_turns() {
        let client = ScriptedClient::new(vec![
            Completion::stop("first"),
            Completion::stop("second"),
            Completion::stop("Ready."),
        ]);
        let assistant = assistant(client.clone(), Registry::default());
        assistant.message("one").await.unwrap();
        assistant.message("two").await.unwrap();

        let ack = assistant.reset().await.unwrap();
        assert_eq!(ack, "Ready.");

        let session = assistant.snapshot().await;
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0].role, Role::System);
        assert_eq!(session.messages()[0].content, SYSTEM_PROMPT);
        assert_eq!(session.messages()[1].role, Role::Assistant);
        assert_eq!(session.messages()[1].content, "Ready.");

        // The reset request carried only the system prompt
        assert_eq!(client.requests()[2].len(), 1);
    }

    #[tokio::test]
    async fn test_turns_share_history() {
        let client = ScriptedClient::new(vec![
            Completion::call("add", r#"{"num1":2,"num2":3}"#),
            Completion::stop("5"),
            Completion::stop("you asked about 2 + 3"),
        ]);
        let mut registry = Registry::default();
        registry.register(Arc::new(AddCapability::new())).unwrap();
        let assistant = assistant(client.clone(), registry);

        assert_eq!(assistant.message("2 + 3?").await.unwrap(), "5");
        assistant.message("what did I ask?").await.unwrap();

        // user, call, result, answer, then the new user turn
        assert_eq!(client.requests()[2].len(), 5);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_user_message() {
        let client = ScriptedClient::new(vec![]);
        let assistant = assistant(client, Registry::default());

        assert!(assistant.message("hi").await.is_err());
        assert_eq!(assistant.snapshot().await.len(), 1);
    }
}
