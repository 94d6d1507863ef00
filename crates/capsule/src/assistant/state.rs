//! Assistant configuration and per-turn dispatch state

use super::SYSTEM_PROMPT;

/// Configuration for the assistant
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// System prompt placed at the start of every conversation
    pub system_prompt: String,
    /// Maximum function calls within one turn
    pub max_chain_depth: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_chain_depth: 8,
        }
    }
}

impl AssistantConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }
}

/// What happened during one dispatch turn
#[derive(Debug, Default)]
pub struct DispatchState {
    /// Completion requests made
    pub completions: usize,
    /// Capability ids called, in order
    pub calls: Vec<String>,
    /// Calls whose envelope carried an error
    pub failed_calls: usize,
    /// Final answer, once the turn ends
    pub final_response: Option<String>,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Function calls made so far in this turn
    pub fn depth(&self) -> usize {
        self.calls.len()
    }

    pub fn record_call(&mut self, id: &str, failed: bool) {
        self.calls.push(id.to_string());
        if failed {
            self.failed_calls += 1;
        }
    }

    pub fn mark_finished(&mut self, response: String) {
        self.final_response = Some(response);
    }
}
