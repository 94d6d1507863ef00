//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use capsule_core::{ChatMessage, Completion, CompletionClient, CompletionError, Config};
use capsule_sdk::{FunctionSchema, ParameterProperty, ParameterSchema};
use parking_lot::Mutex;

use crate::plugins::{Capability, CapabilityContext, CapabilityLoader, LoadError};

/// Completion client that replays a fixed script and records every request
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<Completion, CompletionError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    function_counts: Mutex<Vec<usize>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Completion>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            ..Default::default()
        })
    }

    pub fn with_results(script: Vec<Result<Completion, CompletionError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Message histories sent so far, one per request
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of function schemas offered on each request
    pub fn function_counts(&self) -> Vec<usize> {
        self.function_counts.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn model(&self) -> &str {
        "test-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        functions: &[FunctionSchema],
    ) -> Result<Completion, CompletionError> {
        self.requests.lock().push(messages.to_vec());
        self.function_counts.lock().push(functions.len());
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Err(CompletionError::EmptyChoices))
    }
}

/// Adds `num1` and `num2`
pub struct AddCapability {
    calls: Arc<AtomicUsize>,
}

impl AddCapability {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Capability for AddCapability {
    async fn init(&mut self, _ctx: &CapabilityContext) -> Result<()> {
        Ok(())
    }

    fn id(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers"
    }

    fn function_schema(&self) -> FunctionSchema {
        FunctionSchema::new(
            "add",
            "Add two numbers",
            ParameterSchema::new()
                .with_required("num1", ParameterProperty::number("First number"))
                .with_required("num2", ParameterProperty::number("Second number")),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let args: serde_json::Value = serde_json::from_str(arguments)?;
        let a = args["num1"].as_f64().ok_or_else(|| anyhow!("num1 is required"))?;
        let b = args["num2"].as_f64().ok_or_else(|| anyhow!("num2 is required"))?;
        Ok(format!("{}", a + b))
    }
}

/// Capability with a fixed id and a fixed outcome
pub struct FixedCapability {
    pub id: String,
    pub description: String,
    pub outcome: std::result::Result<String, String>,
    pub fail_init: bool,
}

impl FixedCapability {
    pub fn ok(id: &str, description: &str, result: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            outcome: Ok(result.to_string()),
            fail_init: false,
        }
    }

    pub fn failing(id: &str, error: &str) -> Self {
        Self {
            outcome: Err(error.to_string()),
            ..Self::ok(id, "fails", "")
        }
    }
}

#[async_trait]
impl Capability for FixedCapability {
    async fn init(&mut self, _ctx: &CapabilityContext) -> Result<()> {
        if self.fail_init {
            return Err(anyhow!("backing store unavailable"));
        }
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn function_schema(&self) -> FunctionSchema {
        FunctionSchema::new(&self.id, &self.description, ParameterSchema::new())
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        self.outcome.clone().map_err(|e| anyhow!(e))
    }
}

/// Loader whose units are plain files holding the capability id
pub struct UnitFileLoader;

#[async_trait]
impl CapabilityLoader for UnitFileLoader {
    fn discover(&self, dir: &Path) -> std::result::Result<Vec<PathBuf>, LoadError> {
        let entries = std::fs::read_dir(dir).map_err(|source| LoadError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut units: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        units.sort();
        Ok(units)
    }

    async fn load(&self, path: &Path) -> std::result::Result<Box<dyn Capability>, LoadError> {
        let id = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Protocol {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .trim()
            .to_string();
        if !capsule_sdk::is_valid_id(&id) {
            return Err(LoadError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason: format!("invalid id {:?}", id),
            });
        }
        Ok(Box::new(FixedCapability::ok(&id, "generated", "")))
    }
}

/// Context whose plugin tree lives under `root`
pub fn context_in(root: &Path, client: Arc<dyn CompletionClient>) -> CapabilityContext {
    let mut config = Config::default();
    config.plugins.path = root.to_path_buf();
    CapabilityContext::new(Arc::new(config), client)
}
