//! Enclave CLI
//!
//! Ask questions of your company's documents, limited to what your identity
//! may read.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{AskCommand, ChatCommand, ScopesCommand};
use enclave_core::{config::AppConfig, logging};
use std::path::PathBuf;

/// Enclave - permission-scoped answers from departmental documents
#[derive(Parser, Debug)]
#[command(name = "enclave")]
#[command(about = "Permission-scoped answers from departmental documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "ENCLAVE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "ENCLAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// LLM provider (ollama, openai)
    #[arg(short, long, global = true, env = "ENCLAVE_PROVIDER")]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long, global = true, env = "ENCLAVE_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a single question
    Ask(AskCommand),

    /// Interactive conversation on stdin
    Chat(ChatCommand),

    /// Show the scopes an identity can read
    Scopes(ScopesCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load().context("failed to load configuration")?;

    // A different workspace or config file means a different YAML file
    if cli.workspace.is_some() || cli.config.is_some() {
        config = config.with_overrides(cli.workspace, cli.config, None, None, None, false, false);
        let config_path = config.config_path();
        if config_path.exists() {
            config = config
                .merge_yaml(&config_path)
                .with_context(|| format!("failed to read {:?}", config_path))?;
        }
    }
    let config = config.with_overrides(
        None,
        None,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_format)?;

    tracing::debug!(workspace = ?config.workspace, provider = %config.provider, model = %config.model, "configuration loaded");

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Chat(_) => "chat",
        Commands::Scopes(_) => "scopes",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Chat(cmd) => cmd.execute(&config).await,
        Commands::Scopes(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::debug!("command completed"),
        Err(e) => tracing::error!(error = %e, "command failed"),
    }

    result.with_context(|| format!("enclave {} failed", command_name))
}
