//! Capability framework
//!
//! A capability is a self-describing unit the model can call as a function.
//! Built-ins live in-process; everything else is loaded from
//! `<plugins>/compiled` through a [`loader::CapabilityLoader`].

pub mod builtin;
pub mod loader;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use capsule_core::{CompletionClient, Config};
use capsule_sdk::FunctionSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use loader::{CapabilityLoader, ProcessLoader};
pub use registry::{LoadSummary, Registry};

/// Shared context handed to every capability during `init`
#[derive(Clone)]
pub struct CapabilityContext {
    pub config: Arc<Config>,
    pub client: Arc<dyn CompletionClient>,
}

impl CapabilityContext {
    pub fn new(config: Arc<Config>, client: Arc<dyn CompletionClient>) -> Self {
        Self { config, client }
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.config.compiled_dir()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.data_dir()
    }
}

impl std::fmt::Debug for CapabilityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityContext")
            .field("plugins", &self.config.plugins.path)
            .field("model", &self.client.model())
            .finish()
    }
}

/// A callable capability
#[async_trait]
pub trait Capability: Send + Sync {
    /// Prepare the capability; failures here are load errors
    async fn init(&mut self, ctx: &CapabilityContext) -> Result<()>;

    /// Unique id, also the function name presented to the model
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn function_schema(&self) -> FunctionSchema;

    /// Execute with the raw JSON argument text produced by the model
    async fn execute(&self, arguments: &str) -> Result<String>;

    /// Overrides the registry's execute timeout; `None` uses the default
    fn execute_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Outcome of one invocation; exactly one field is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn result(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// JSON text as fed back into the conversation
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"unencodable result"}"#.into())
    }
}

/// A unit could not be turned into a registered capability
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read plugin directory {}: {source}", .path.display())]
    DirectoryUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start unit {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unit {} broke protocol: {message}", .path.display())]
    Protocol { path: PathBuf, message: String },

    #[error("unit {} does not conform to the capability interface: {reason}", .path.display())]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("capability {id} failed to initialize: {message}")]
    Init { id: String, message: String },

    #[error("capability id {0} is already registered")]
    DuplicateId(String),

    #[error("{what} timed out after {limit:?}")]
    Timeout { what: String, limit: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        assert_eq!(Envelope::result("5").to_json(), r#"{"result":"5"}"#);
        assert_eq!(
            Envelope::error("plugin with ID foo not found").to_json(),
            r#"{"error":"plugin with ID foo not found"}"#
        );
        assert!(Envelope::error("x").is_error());
        assert!(!Envelope::result("x").is_error());
    }

    #[test]
    fn test_load_error_messages() {
        let err = LoadError::InvalidDescriptor {
            path: PathBuf::from("/p/compiled/x"),
            reason: "id mismatch".into(),
        };
        assert_eq!(
            err.to_string(),
            "unit /p/compiled/x does not conform to the capability interface: id mismatch"
        );
        assert_eq!(
            LoadError::DuplicateId("memory".into()).to_string(),
            "capability id memory is already registered"
        );
        let timeout = LoadError::Timeout {
            what: "describe of /p/compiled/x".into(),
            limit: Duration::from_millis(250),
        };
        assert_eq!(timeout.to_string(), "describe of /p/compiled/x timed out after 250ms");
    }
}
