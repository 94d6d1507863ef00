//! capsule: a conversational assistant that extends itself
//!
//! The model calls capabilities as functions. When none fits, it can write a
//! new one with `create-plugin`, which is compiled into `<plugins>/compiled`
//! and loaded on the next start.

mod assistant;
mod commands;
mod plugins;
mod repl;
mod session;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::GlobalOpts;

#[derive(Debug, Parser)]
#[command(name = "capsule")]
#[command(about = "Conversational assistant that writes its own capabilities", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(long, global = true, env = "CAPSULE_CONFIG")]
    config: Option<PathBuf>,

    /// OpenAI API key
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start interactive chat REPL
    Chat,

    /// One-shot query (non-interactive)
    Ask {
        /// The prompt to send
        prompt: Vec<String>,
    },

    /// Manage capabilities
    Plugins {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum PluginAction {
    /// List loaded capabilities
    List,
    /// Write and build a new capability from a description
    Create {
        /// What the capability should do
        description: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Create a default config file
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with the transcript
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let opts = GlobalOpts {
        config: cli.config,
        api_key: cli.api_key,
    };

    match cli.command {
        Some(Commands::Chat) | None => repl::run(&opts).await,
        Some(Commands::Ask { prompt }) => commands::ask(&opts, &prompt.join(" ")).await,
        Some(Commands::Plugins { action }) => match action {
            PluginAction::List => commands::plugins_list(&opts).await,
            PluginAction::Create { description } => {
                commands::plugins_create(&opts, &description.join(" ")).await
            }
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => commands::config_init(&opts).await,
            ConfigAction::Path => commands::config_path(&opts).await,
        },
    }
}
