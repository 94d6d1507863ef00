//! User configuration for capsule
//!
//! Configuration file: ~/.config/capsule/config.toml (or platform equivalent)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub authoring: AuthoringConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Completion API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; `OPENAI_API_KEY` takes precedence
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// What to do when a single capability unit fails to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Abort startup on the first failure
    #[default]
    FailFast,
    /// Log a warning and continue with the remaining units
    SkipInvalid,
}

/// Capability loading and dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Root of the plugin tree (compiled units, generated sources, data)
    #[serde(default = "default_plugins_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub load_policy: LoadPolicy,

    /// Maximum function calls chained within one turn
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    #[serde(default = "default_execute_timeout")]
    pub execute_timeout_secs: u64,

    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
}

/// Self-authoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoringConfig {
    /// Total build attempts, including the first
    #[serde(default = "default_max_build_attempts")]
    pub max_build_attempts: u32,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Cargo executable used to build generated units
    #[serde(default = "default_cargo")]
    pub cargo: String,

    /// Location of capsule-sdk referenced by generated manifests
    #[serde(default)]
    pub sdk_path: Option<PathBuf>,
}

/// Memory capability settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Backing file; defaults to `<plugins>/data/memories.json`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo-0613".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_plugins_path() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_max_chain_depth() -> usize {
    8
}

fn default_execute_timeout() -> u64 {
    60
}

fn default_init_timeout() -> u64 {
    10
}

fn default_max_build_attempts() -> u32 {
    3
}

fn default_build_timeout() -> u64 {
    600
}

fn default_cargo() -> String {
    "cargo".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            path: default_plugins_path(),
            load_policy: LoadPolicy::default(),
            max_chain_depth: default_max_chain_depth(),
            execute_timeout_secs: default_execute_timeout(),
            init_timeout_secs: default_init_timeout(),
        }
    }
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        Self {
            max_build_attempts: default_max_build_attempts(),
            build_timeout_secs: default_build_timeout(),
            cargo: default_cargo(),
            sdk_path: None,
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when the file is missing
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(explicit)?;

        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// The explicit path if given, otherwise the platform default
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path(),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("capsule").join("config.toml"))
    }

    /// Write a commented default configuration file
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let default_config = r#"# capsule configuration

[openai]
# API key (OPENAI_API_KEY overrides this)
# api_key = "sk-..."
base_url = "https://api.openai.com/v1"
model = "gpt-3.5-turbo-0613"
timeout_secs = 120

[plugins]
# Root holding compiled/, source/generated/, target/ and data/
path = "./plugins"

# "fail_fast" aborts startup on a bad unit, "skip_invalid" warns and continues
load_policy = "fail_fast"

# Maximum function calls chained within a single turn
max_chain_depth = 8

execute_timeout_secs = 60
init_timeout_secs = 10

[authoring]
# Total build attempts for a generated capability, including the first
max_build_attempts = 3
build_timeout_secs = 600
cargo = "cargo"

# Path to capsule-sdk used by generated units
# sdk_path = "/path/to/capsule/crates/capsule-sdk"

[memory]
# path = "./plugins/data/memories.json"
"#;

        fs::write(path, default_config)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Directory scanned for compiled capability units
    pub fn compiled_dir(&self) -> PathBuf {
        self.plugins.path.join("compiled")
    }

    /// Root under which generated sources live, one directory per id
    pub fn generated_source_dir(&self) -> PathBuf {
        self.plugins.path.join("source").join("generated")
    }

    /// Shared cargo target directory for generated units
    pub fn target_dir(&self) -> PathBuf {
        self.plugins.path.join("target")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.plugins.path.join("data")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.memory
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("memories.json"))
    }

    /// capsule-sdk location for generated manifests
    pub fn sdk_path(&self) -> PathBuf {
        self.authoring.sdk_path.clone().unwrap_or_else(|| {
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .parent()
                .map(|crates| crates.join("capsule-sdk"))
                .unwrap_or_else(|| PathBuf::from("capsule-sdk"))
        })
    }
}
