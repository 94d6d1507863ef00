//! Dispatch loop: alternate completions and capability calls until the model
//! answers in plain text

use capsule_core::{ChatMessage, CompletionClient, CompletionError, FinishReason, FunctionCall};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::state::DispatchState;
use crate::plugins::Registry;
use crate::session::Session;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("function call chain exceeded {limit} calls in one turn")]
    CallChainTooDeep { limit: usize },

    #[error("completion finished unexpectedly: {0}")]
    UnexpectedFinish(String),
}

impl DispatchError {
    /// User-facing remediation, if any
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            DispatchError::Completion(e) => e.remediation(),
            _ => None,
        }
    }
}

/// Runs turns against a session
pub struct Dispatcher<'a> {
    client: &'a dyn CompletionClient,
    registry: &'a Registry,
    max_chain_depth: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        client: &'a dyn CompletionClient,
        registry: &'a Registry,
        max_chain_depth: usize,
    ) -> Self {
        Self {
            client,
            registry,
            max_chain_depth,
        }
    }

    /// Complete the conversation in `session` until the model stops
    ///
    /// Every exchange is appended to `session` as it happens, so history is
    /// kept even when the turn fails partway.
    #[instrument(skip(self, session), fields(model = %self.client.model(), history = session.len()))]
    pub async fn run(&self, session: &mut Session) -> Result<DispatchState, DispatchError> {
        let functions = self.registry.function_schemas();
        let mut state = DispatchState::new();

        loop {
            state.completions += 1;
            debug!(
                completion = state.completions,
                depth = state.depth(),
                "Requesting completion"
            );

            let completion = self.client.complete(session.messages(), &functions).await?;

            match completion.finish_reason {
                FinishReason::Stop => {
                    session.push(ChatMessage::assistant(completion.content.clone()));
                    state.mark_finished(completion.content);
                    info!(calls = state.depth(), "Turn complete");
                    return Ok(state);
                }
                FinishReason::Length => {
                    warn!("Completion truncated at the length limit");
                    session.push(ChatMessage::assistant(completion.content.clone()));
                    state.mark_finished(completion.content);
                    return Ok(state);
                }
                FinishReason::FunctionCall => {
                    let call = completion.function_call.ok_or_else(|| {
                        DispatchError::UnexpectedFinish(
                            "function_call without a function call".to_string(),
                        )
                    })?;

                    if state.depth() >= self.max_chain_depth {
                        warn!(
                            capability = %call.name,
                            limit = self.max_chain_depth,
                            "Call chain too deep"
                        );
                        return Err(DispatchError::CallChainTooDeep {
                            limit: self.max_chain_depth,
                        });
                    }

                    self.call(session, &mut state, call).await;
                }
                FinishReason::Other(reason) => {
                    warn!(reason = %reason, "Unexpected finish reason");
                    return Err(DispatchError::UnexpectedFinish(reason));
                }
            }
        }
    }

    /// Invoke one capability and record both sides of the call
    async fn call(&self, session: &mut Session, state: &mut DispatchState, call: FunctionCall) {
        debug!(capability = %call.name, depth = state.depth() + 1, "Dispatching function call");

        let request = json!({ "name": call.name, "arguments": call.arguments });
        session.push(ChatMessage::function(&call.name, request.to_string()));

        let envelope = self.registry.invoke(&call.name, &call.arguments).await;
        state.record_call(&call.name, envelope.is_error());
        session.push(ChatMessage::function(&call.name, envelope.to_json()));
    }
}
