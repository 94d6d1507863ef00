//! Key/value memory persisted to a JSON file

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use capsule_sdk::{FunctionSchema, ParameterProperty, ParameterSchema};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::plugins::{Capability, CapabilityContext};

pub const MEMORY_ID: &str = "memory";

const DESCRIPTION: &str = "Store and recall facts about the user across conversations";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Store,
    Retrieve,
    List,
    Hydrate,
}

#[derive(Debug, Deserialize)]
struct MemoryArgs {
    action: Action,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// The `memory` capability
pub struct MemoryCapability {
    path: Option<PathBuf>,
    memories: RwLock<HashMap<String, String>>,
    // Serializes snapshot-and-write so the file always matches some map state
    persist: tokio::sync::Mutex<()>,
}

impl MemoryCapability {
    pub fn new() -> Self {
        Self {
            path: None,
            memories: RwLock::new(HashMap::new()),
            persist: tokio::sync::Mutex::new(()),
        }
    }

    /// Use `path` instead of the configured location
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn backing_file(&self) -> Result<&PathBuf> {
        self.path
            .as_ref()
            .ok_or_else(|| anyhow!("memory store used before init"))
    }

    async fn store(&self, key: String, value: String) -> Result<String> {
        let path = self.backing_file()?;
        let _guard = self.persist.lock().await;

        // The map only changes once the file holds the new state
        let mut next = self.memories.read().clone();
        next.insert(key.clone(), value.clone());
        let snapshot = serde_json::to_string_pretty(&next)?;
        tokio::fs::write(path, snapshot)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.memories.write().insert(key.clone(), value);

        debug!(key = %key, "Stored memory");
        Ok(format!("stored memory {}", key))
    }

    fn retrieve(&self, key: &str) -> Result<String> {
        self.memories
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("memory with key {} not found", key))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.memories.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn hydrate(&self) -> String {
        let memories = self.memories.read();
        if memories.is_empty() {
            return "no memories stored yet".to_string();
        }
        let mut lines: Vec<_> = memories.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        lines.sort();
        lines.join("\n")
    }
}

impl Default for MemoryCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for MemoryCapability {
    async fn init(&mut self, ctx: &CapabilityContext) -> Result<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| ctx.config.memory_path());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let memories = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
        } else {
            tokio::fs::write(&path, "{}")
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            HashMap::new()
        };

        debug!(path = %path.display(), count = memories.len(), "Opened memory store");
        *self.memories.get_mut() = memories;
        self.path = Some(path);
        Ok(())
    }

    fn id(&self) -> &str {
        MEMORY_ID
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn function_schema(&self) -> FunctionSchema {
        FunctionSchema::new(
            MEMORY_ID,
            "Store a memory under a key, retrieve one by key, list all keys, or hydrate \
             every stored memory at the start of a conversation. Include enough context \
             in stored values to make them useful later.",
            ParameterSchema::new()
                .with_required(
                    "action",
                    ParameterProperty::string("What to do").with_enum([
                        "store", "retrieve", "list", "hydrate",
                    ]),
                )
                .with_property(
                    "key",
                    ParameterProperty::string("Memory key; required for store and retrieve"),
                )
                .with_property(
                    "value",
                    ParameterProperty::string("Memory content; required for store"),
                ),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: MemoryArgs =
            serde_json::from_str(arguments).context("Invalid memory arguments")?;

        match args.action {
            Action::Store => {
                let (Some(key), Some(value)) = (args.key, args.value) else {
                    bail!("store requires both key and value");
                };
                self.store(key, value).await
            }
            Action::Retrieve => {
                let key = args.key.ok_or_else(|| anyhow!("retrieve requires a key"))?;
                self.retrieve(&key)
            }
            Action::List => Ok(serde_json::to_string(&self.keys())?),
            Action::Hydrate => Ok(self.hydrate()),
        }
    }
}
