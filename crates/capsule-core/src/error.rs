//! Completion API error taxonomy

use thiserror::Error;

/// Hint shown when the completion API rejects the credentials
pub const UNAUTHORIZED_HINT: &str = "Invalid OpenAI API key. Find your key at \
https://platform.openai.com/account/api-keys and set it as OPENAI_API_KEY \
or under [openai] api_key in the config file.";

/// Failures talking to the completion API
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion API rejected the credentials (HTTP 401)")]
    Unauthorized,

    #[error("completion API rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("completion API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("completion request timed out")]
    Timeout,

    #[error("completion transport failed: {0}")]
    Transport(String),

    #[error("could not decode completion response: {0}")]
    Decode(String),

    #[error("completion response contained no choices")]
    EmptyChoices,
}

impl CompletionError {
    /// User-facing remediation, if the error has one
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Unauthorized => Some(UNAUTHORIZED_HINT),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
