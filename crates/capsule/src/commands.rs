//! CLI commands implementation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use capsule_core::{CompletionClient, Config, OpenAiClient};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::assistant::{Assistant, AssistantConfig, DispatchError};
use crate::plugins::builtin::{register_builtins, CreatePluginCapability};
use crate::plugins::{Capability, CapabilityContext, ProcessLoader, Registry};

// ANSI color codes
pub const GREEN: &str = "\x1b[92m";
pub const RED: &str = "\x1b[91m";
pub const YELLOW: &str = "\x1b[93m";
pub const BLUE: &str = "\x1b[94m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RESET: &str = "\x1b[0m";

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub api_key: Option<String>,
}

impl GlobalOpts {
    /// Load configuration and apply command-line overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(key) = &self.api_key {
            config.openai.api_key = Some(key.clone());
        }
        Ok(config)
    }
}

/// Everything a conversation needs, loaded and ready
pub struct Runtime {
    pub config: Arc<Config>,
    pub client: Arc<dyn CompletionClient>,
    pub registry: Arc<Registry>,
}

impl Runtime {
    /// Connect to the completion API and load every capability
    pub async fn bootstrap(opts: &GlobalOpts) -> Result<Self> {
        let config = opts.load_config()?;
        let client = OpenAiClient::new(&config.openai).context("Failed to create API client")?;
        Self::start(config, Arc::new(client)).await
    }

    /// Register built-ins, then load compiled units under the configured policy
    pub async fn start(config: Config, client: Arc<dyn CompletionClient>) -> Result<Self> {
        let config = Arc::new(config);
        let ctx = CapabilityContext::new(Arc::clone(&config), Arc::clone(&client));

        let mut registry =
            Registry::new(Duration::from_secs(config.plugins.execute_timeout_secs));
        register_builtins(&mut registry, &ctx)
            .await
            .context("Failed to register built-in capabilities")?;

        let loader = ProcessLoader::new(Duration::from_secs(config.plugins.init_timeout_secs));
        let compiled = config.compiled_dir();
        let summary = registry
            .load_all(&compiled, &loader, &ctx, config.plugins.load_policy)
            .await
            .with_context(|| format!("Failed to load capabilities from {}", compiled.display()))?;

        for (unit, error) in &summary.skipped {
            eprintln!("{}Skipped:{} {}: {}", YELLOW, RESET, unit, error);
        }
        info!(
            loaded = summary.loaded.len(),
            skipped = summary.skipped.len(),
            total = registry.len(),
            "Capabilities ready"
        );

        Ok(Self {
            config,
            client,
            registry: Arc::new(registry),
        })
    }

    pub fn assistant(&self) -> Assistant {
        let config =
            AssistantConfig::default().with_max_chain_depth(self.config.plugins.max_chain_depth);
        Assistant::new(
            Arc::clone(&self.client),
            Arc::clone(&self.registry),
            config,
        )
    }
}

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Print a turn failure, with remediation when there is one
pub fn print_dispatch_error(error: &DispatchError) {
    eprintln!("{}Error:{} {}", RED, RESET, error);
    if let Some(hint) = error.remediation() {
        eprintln!("{}{}{}", YELLOW, hint, RESET);
    }
}

/// One-shot query (non-interactive)
pub async fn ask(opts: &GlobalOpts, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided");
    }

    let runtime = Runtime::bootstrap(opts).await?;
    let assistant = runtime.assistant();

    let pb = spinner("Thinking...");
    let result = match assistant.reset().await {
        Ok(_) => assistant.message(prompt).await,
        Err(e) => Err(e),
    };
    pb.finish_and_clear();

    match result {
        Ok(answer) => {
            println!("{}", answer);
            Ok(())
        }
        Err(e) => {
            print_dispatch_error(&e);
            Err(e.into())
        }
    }
}

/// List loaded capabilities
pub async fn plugins_list(opts: &GlobalOpts) -> Result<()> {
    let runtime = Runtime::bootstrap(opts).await?;

    println!(
        "{}Capabilities ({}){}",
        BOLD,
        runtime.registry.len(),
        RESET
    );
    for (id, description) in runtime.registry.list() {
        println!("  {}{}{} - {}", BLUE, id, RESET, description);
    }
    println!(
        "\n{}Compiled units: {}{}",
        DIM,
        runtime.config.compiled_dir().display(),
        RESET
    );

    Ok(())
}

/// Run the authoring pipeline without a conversation
pub async fn plugins_create(opts: &GlobalOpts, description: &str) -> Result<()> {
    let config = Arc::new(opts.load_config()?);
    let client: Arc<dyn CompletionClient> =
        Arc::new(OpenAiClient::new(&config.openai).context("Failed to create API client")?);
    let ctx = CapabilityContext::new(Arc::clone(&config), client);

    let mut capability = CreatePluginCapability::new();
    capability.init(&ctx).await?;

    let pb = spinner("Writing and building capability...");
    let result = capability.create(description).await;
    pb.finish_and_clear();

    match result {
        Ok(report) => {
            println!("{}Created:{} {}", GREEN, RESET, report.summary());
            if let Some(artifact) = &report.artifact {
                println!("  Source: {}", artifact.source_path.display());
                println!("  Unit:   {}", artifact.unit_path.display());
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Capability creation failed");
            Err(e.into())
        }
    }
}

/// Create default config file
pub async fn config_init(opts: &GlobalOpts) -> Result<()> {
    let path = Config::resolve_path(opts.config.as_deref())?;

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    Config::create_default(&path)?;
    println!("{}Created:{} {}", GREEN, RESET, path.display());
    println!("\nSet OPENAI_API_KEY or edit this file to add your API key.");
    Ok(())
}

/// Print config file path
pub async fn config_path(opts: &GlobalOpts) -> Result<()> {
    let path = Config::resolve_path(opts.config.as_deref())?;
    println!("{}", path.display());
    Ok(())
}
