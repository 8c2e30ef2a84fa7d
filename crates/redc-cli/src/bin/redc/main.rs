//! redc - compose orchestration and cost estimation for scenario templates.
//!
//! # Usage
//!
//! ```bash
//! # Preview what a compose file would create
//! redc compose config -f redc-compose.yaml --profile c2
//!
//! # Deploy, then tear down
//! redc compose up --project ops --profile c2
//! redc compose down --project ops --profile c2
//!
//! # Estimate hourly and monthly cost
//! redc cost estimate --provider aws --region us-east-1 --resource c5.large:3
//!
//! # JSON output for scripting
//! redc --json compose config | jq '.services[].name'
//! ```
//!
//! # Tiger Style
//!
//! - Explicit error handling with anyhow at the top level
//! - Ctrl-C cancels the shared token; canceled runs exit cleanly
//! - Fail-fast on invalid arguments and configuration

mod cli;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Initialize tracing subscriber with environment-based filtering.
///
/// - `quiet`: Suppress all logging output (for scripting)
/// - `verbose`: Enable debug-level logging
fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.global.is_quiet, cli.global.is_verbose);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, canceling...");
            on_signal.cancel();
        }
    });

    match cli.run(&cancel).await {
        Err(_) if cancel.is_cancelled() => {
            eprintln!("operation canceled");
            Ok(())
        }
        other => other,
    }
}
