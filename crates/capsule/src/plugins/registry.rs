//! Capability registry: id-indexed catalog used for dispatch and schema listing

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use capsule_core::LoadPolicy;
use capsule_sdk::FunctionSchema;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::loader::CapabilityLoader;
use super::{Capability, CapabilityContext, Envelope, LoadError};

/// Result of a `load_all` pass
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Ids registered during this pass
    pub loaded: Vec<String>,
    /// Units that were skipped, with the reason
    pub skipped: Vec<(String, LoadError)>,
}

/// Registry of loaded capabilities
///
/// Ids are unique: the first registration wins and later ones are rejected
/// with [`LoadError::DuplicateId`].
pub struct Registry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    execute_timeout: Duration,
}

impl Registry {
    pub fn new(execute_timeout: Duration) -> Self {
        Self {
            capabilities: HashMap::new(),
            execute_timeout,
        }
    }

    /// Register an already initialized capability
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), LoadError> {
        let id = capability.id().to_string();
        if self.capabilities.contains_key(&id) {
            return Err(LoadError::DuplicateId(id));
        }
        debug!(capability = %id, "Registered capability");
        self.capabilities.insert(id, capability);
        Ok(())
    }

    /// Initialize a capability with the shared context, then register it
    pub async fn init_and_register(
        &mut self,
        mut capability: Box<dyn Capability>,
        ctx: &CapabilityContext,
    ) -> Result<String, LoadError> {
        let id = capability.id().to_string();

        // Reject before init so a duplicate never touches its backing store
        if self.is_loaded(&id) {
            return Err(LoadError::DuplicateId(id));
        }

        let limit = Duration::from_secs(ctx.config.plugins.init_timeout_secs);
        match timeout(limit, capability.init(ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(LoadError::Init {
                    id,
                    message: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(LoadError::Timeout {
                    what: format!("init of capability {}", id),
                    limit,
                })
            }
        }

        self.register(Arc::from(capability))?;
        Ok(id)
    }

    /// Discover, load, initialize and register every unit in `dir`
    ///
    /// Under [`LoadPolicy::FailFast`] the first failure is returned and
    /// aborts the pass. Under [`LoadPolicy::SkipInvalid`] failures are logged
    /// and collected into the summary.
    #[instrument(skip(self, dir, loader, ctx), fields(dir = %dir.display()))]
    pub async fn load_all(
        &mut self,
        dir: &Path,
        loader: &dyn CapabilityLoader,
        ctx: &CapabilityContext,
        policy: LoadPolicy,
    ) -> Result<LoadSummary, LoadError> {
        let mut summary = LoadSummary::default();

        for path in loader.discover(dir)? {
            let unit = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            let outcome = match loader.load(&path).await {
                Ok(capability) => self.init_and_register(capability, ctx).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(id) => {
                    info!(capability = %id, unit = %unit, "Loaded capability");
                    summary.loaded.push(id);
                }
                Err(e) => match policy {
                    LoadPolicy::FailFast => return Err(e),
                    LoadPolicy::SkipInvalid => {
                        warn!(unit = %unit, error = %e, "Skipping capability unit");
                        summary.skipped.push((unit, e));
                    }
                },
            }
        }

        Ok(summary)
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.capabilities.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(id).cloned()
    }

    /// Invoke `id` with JSON `arguments`
    ///
    /// Never fails: unknown ids, execution errors and timeouts all become
    /// error envelopes.
    #[instrument(skip(self, arguments), fields(capability = %id))]
    pub async fn invoke(&self, id: &str, arguments: &str) -> Envelope {
        let Some(capability) = self.get(id) else {
            warn!("Function call targets an unknown capability");
            return Envelope::error(format!("plugin with ID {} not found", id));
        };

        let limit = capability.execute_timeout().unwrap_or(self.execute_timeout);
        match timeout(limit, capability.execute(arguments)).await {
            Ok(Ok(result)) => {
                debug!(result_len = result.len(), "Capability executed");
                Envelope::result(result)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Capability execution failed");
                Envelope::error(format!("{:#}", e))
            }
            Err(_) => {
                warn!(timeout = ?limit, "Capability execution timed out");
                Envelope::error(format!("capability {} timed out after {:?}", id, limit))
            }
        }
    }

    /// One schema per registered capability, the model's function catalog
    ///
    /// Sorted by name so identical registries produce identical requests.
    pub fn function_schemas(&self) -> Vec<FunctionSchema> {
        let mut schemas: Vec<_> = self
            .capabilities
            .values()
            .map(|c| c.function_schema())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// `(id, description)` pairs sorted by id
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .capabilities
            .values()
            .map(|c| (c.id().to_string(), c.description().to_string()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.capabilities.keys().collect();
        ids.sort();
        f.debug_struct("Registry")
            .field("capabilities", &ids)
            .finish()
    }
}
