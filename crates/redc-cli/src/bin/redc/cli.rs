//! CLI argument parsing and command dispatch.
//!
//! Uses clap derive macros for declarative argument definition with
//! support for environment variables and global options.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::commands::compose::ComposeCommand;
use crate::commands::cost::CostCommand;
use crate::config::RedcConfig;

/// Command-line interface for redc.
#[derive(Parser)]
#[command(name = "redc")]
#[command(version)]
#[command(about = "Compose orchestration and cost estimation for redc scenario templates")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Global options available to all commands.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// Configuration file (TOML).
    ///
    /// Defaults to ~/.redc/config.toml when present.
    #[arg(long = "config", env = "REDC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Operator recorded on projects and cases.
    #[arg(long = "user", global = true)]
    pub user: Option<String>,

    /// Output JSON instead of human-readable format.
    #[arg(long = "json", global = true)]
    pub is_json: bool,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub is_verbose: bool,

    /// Suppress all logging output.
    ///
    /// Useful for scripting and when parsing JSON output.
    #[arg(short = 'q', long = "quiet", global = true)]
    pub is_quiet: bool,
}

/// Top-level command categories.
#[derive(Subcommand)]
pub enum Commands {
    /// Multi-service scenarios from a compose file.
    #[command(subcommand)]
    Compose(ComposeCommand),

    /// Pricing lookups and cost estimates.
    #[command(subcommand)]
    Cost(CostCommand),
}

impl Cli {
    /// Load configuration and run the selected command.
    pub async fn run(self, cancel: &CancellationToken) -> Result<()> {
        let mut config = RedcConfig::load(self.global.config.as_deref()).context("failed to load configuration")?;
        if let Some(user) = &self.global.user {
            config.user = user.clone();
        }

        match self.command {
            Commands::Compose(cmd) => cmd.run(&config, self.global.is_json, cancel).await,
            Commands::Cost(cmd) => cmd.run(&config, self.global.is_json, cancel).await,
        }
    }
}
