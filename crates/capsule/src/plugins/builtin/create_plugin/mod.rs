//! The `create-plugin` capability: the model writes, builds and repairs a
//! new capability unit from a plain-language description.
//!
//! A unit built here is placed in `<plugins>/compiled` but is not registered
//! in the running process; it becomes callable after a restart.

pub mod pipeline;
pub mod prompt;
pub mod toolchain;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use capsule_sdk::{FunctionSchema, ParameterProperty, ParameterSchema};
use serde::Deserialize;

use crate::plugins::{Capability, CapabilityContext, ProcessLoader};

pub use pipeline::{
    ArtifactLayout, AuthoringError, AuthoringPipeline, AuthoringReport, AuthoringState,
    BuildStatus, GeneratedArtifact,
};
pub use toolchain::{BuildOutcome, CargoToolchain, Toolchain};

pub const CREATE_PLUGIN_ID: &str = "create-plugin";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePluginArgs {
    plugin_description: String,
}

pub struct CreatePluginCapability {
    pipeline: Option<AuthoringPipeline>,
    time_budget: Option<Duration>,
}

impl CreatePluginCapability {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            time_budget: None,
        }
    }

    /// Use a prepared pipeline; `init` will leave it in place
    pub fn with_pipeline(pipeline: AuthoringPipeline) -> Self {
        Self {
            pipeline: Some(pipeline),
            time_budget: None,
        }
    }

    /// Run the authoring pipeline for `description`
    pub async fn create(&self, description: &str) -> Result<AuthoringReport, AuthoringError> {
        match &self.pipeline {
            Some(pipeline) => pipeline.run(description).await,
            None => Err(AuthoringError::InvalidArguments(
                "create-plugin used before init".into(),
            )),
        }
    }
}

impl Default for CreatePluginCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for CreatePluginCapability {
    async fn init(&mut self, ctx: &CapabilityContext) -> Result<()> {
        let config = &ctx.config;
        let attempts = config.authoring.max_build_attempts.max(1);
        let build_timeout = Duration::from_secs(config.authoring.build_timeout_secs);
        let describe_timeout = Duration::from_secs(config.plugins.init_timeout_secs);

        // One generation, one build and one validation per attempt
        let per_attempt =
            build_timeout + Duration::from_secs(config.openai.timeout_secs) + describe_timeout;
        self.time_budget = Some(per_attempt * attempts);

        if self.pipeline.is_none() {
            let toolchain = CargoToolchain::new(
                config.authoring.cargo.clone(),
                config.target_dir(),
                build_timeout,
            );
            let layout = ArtifactLayout {
                source_root: config.generated_source_dir(),
                compiled_root: config.compiled_dir(),
                sdk_path: config.sdk_path(),
            };
            self.pipeline = Some(AuthoringPipeline::new(
                Arc::clone(&ctx.client),
                Arc::new(toolchain),
                Arc::new(ProcessLoader::new(describe_timeout)),
                layout,
                attempts,
            ));
        }
        Ok(())
    }

    fn id(&self) -> &str {
        CREATE_PLUGIN_ID
    }

    fn description(&self) -> &str {
        "Write, compile and install a new capability from a description"
    }

    fn function_schema(&self) -> FunctionSchema {
        FunctionSchema::new(
            CREATE_PLUGIN_ID,
            "Create a new plugin that gives you a capability you do not have yet. \
             Describe what the plugin should do, which arguments it takes and what it \
             returns. The plugin is available after the assistant restarts.",
            ParameterSchema::new().with_required(
                "pluginDescription",
                ParameterProperty::string(
                    "What the plugin does, its arguments and its result, in plain language",
                ),
            ),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: CreatePluginArgs =
            serde_json::from_str(arguments).context("Invalid create-plugin arguments")?;

        let report = self.create(&args.plugin_description).await?;
        Ok(report.summary())
    }

    fn execute_timeout(&self) -> Option<Duration> {
        self.time_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Registry;
    use crate::testing::{context_in, ScriptedClient, UnitFileLoader};
    use capsule_core::Completion;
    use std::path::Path;
    use tempfile::TempDir;

    struct AlwaysBuilds;

    #[async_trait]
    impl Toolchain for AlwaysBuilds {
        async fn build(&self, _manifest_dir: &Path, unit_path: &Path) -> std::io::Result<BuildOutcome> {
            if let Some(parent) = unit_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(unit_path, "clock")?;
            Ok(BuildOutcome::Succeeded)
        }
    }

    #[tokio::test]
    async fn test_init_derives_budget_from_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context_in(dir.path(), ScriptedClient::new(vec![]));
        let mut capability = CreatePluginCapability::new();
        capability.init(&ctx).await.unwrap();

        // 3 * (600s build + 120s completion + 10s describe)
        assert_eq!(capability.execute_timeout(), Some(Duration::from_secs(2190)));
        assert_eq!(capability.function_schema().name, "create-plugin");
        assert!(capability
            .function_schema()
            .parameters
            .required
            .contains(&"pluginDescription".to_string()));
    }

    #[tokio::test]
    async fn test_execute_reports_restart_needed() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new(vec![Completion::stop("fn main() {}")]);
        let ctx = context_in(dir.path(), client.clone());

        let layout = ArtifactLayout {
            source_root: ctx.config.generated_source_dir(),
            compiled_root: ctx.config.compiled_dir(),
            sdk_path: ctx.config.sdk_path(),
        };
        let pipeline = AuthoringPipeline::new(
            client,
            Arc::new(AlwaysBuilds),
            Arc::new(UnitFileLoader),
            layout,
            3,
        );

        let mut registry = Registry::default();
        registry
            .init_and_register(Box::new(CreatePluginCapability::with_pipeline(pipeline)), &ctx)
            .await
            .unwrap();

        let envelope = registry
            .invoke("create-plugin", r#"{"pluginDescription":"tell the time"}"#)
            .await;
        let result = envelope.result.unwrap();
        assert!(result.contains("restarted"), "{result}");

        // Built but not hot-loaded
        assert_eq!(registry.len(), 1);
        let units = std::fs::read_dir(ctx.config.compiled_dir()).unwrap().count();
        assert_eq!(units, 1);
    }

    #[tokio::test]
    async fn test_missing_description_is_error_envelope() {
        let dir = TempDir::new().unwrap();
        let ctx = context_in(dir.path(), ScriptedClient::new(vec![]));
        let mut registry = Registry::default();
        registry
            .init_and_register(Box::new(CreatePluginCapability::new()), &ctx)
            .await
            .unwrap();

        let envelope = registry.invoke("create-plugin", r#"{"description":"x"}"#).await;
        assert!(envelope.is_error());
    }
}
