//! Compose commands.
//!
//! `up` deploys every active service in dependency order and then runs the
//! setup tasks, `down` tears them down dependents first, and `config`
//! previews the plan without touching anything.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Subcommand;
use redc_compose::context::DEFAULT_COMPOSE_FILE;
use redc_compose::ComposeEnv;
use redc_compose::ComposeOptions;
use redc_compose::SshCliConnector;
use redc_project::CaseStore;
use redc_project::JsonCaseStore;
use redc_project::ProjectLocks;
use redc_project::RedbCaseStore;
use redc_tofu::CliTofuBackend;
use redc_tofu::ProvisionerRegistry;
use redc_tofu::RetryPolicy;
use tokio_util::sync::CancellationToken;

use crate::config::RedcConfig;
use crate::config::StoreBackend;
use crate::output::print_output;

/// redb database file under the projects directory.
const REDB_FILE: &str = "projects.redb";

/// Compose operations.
#[derive(Subcommand)]
pub enum ComposeCommand {
    /// Deploy all active services, then run setup tasks.
    Up(ComposeArgs),

    /// Destroy all active services that have a case record.
    Down(ComposeArgs),

    /// Preview the plan without deploying anything.
    Config(ComposeArgs),
}

#[derive(Args)]
pub struct ComposeArgs {
    /// Compose file.
    #[arg(short = 'f', long = "file", default_value = DEFAULT_COMPOSE_FILE)]
    pub file: PathBuf,

    /// Profile to activate (repeatable).
    #[arg(long = "profile")]
    pub profiles: Vec<String>,

    /// Project the cases belong to.
    #[arg(long, default_value = "default")]
    pub project: String,
}

impl ComposeArgs {
    fn options(&self, config: &RedcConfig) -> ComposeOptions {
        ComposeOptions {
            file: self.file.clone(),
            profiles: self.profiles.clone(),
            project: self.project.clone(),
            user: config.user.clone(),
        }
    }
}

impl ComposeCommand {
    /// Run the command.
    pub async fn run(self, config: &RedcConfig, json: bool, cancel: &CancellationToken) -> Result<()> {
        match self {
            ComposeCommand::Up(args) => {
                let env = compose_env(config, !json)?;
                let report = redc_compose::run_compose_up(args.options(config), &env, cancel)
                    .await
                    .context("compose up failed")?;
                print_output(&report, json);
            }
            ComposeCommand::Down(args) => {
                let env = compose_env(config, !json)?;
                let report = redc_compose::run_compose_down(args.options(config), &env, cancel)
                    .await
                    .context("compose down failed")?;
                print_output(&report, json);
            }
            ComposeCommand::Config(args) => {
                let plan = redc_compose::inspect_config(args.options(config)).await.context("compose config failed")?;
                print_output(&plan, json);
            }
        }
        Ok(())
    }
}

/// Wire the store, provisioning backend and session connector from config.
fn compose_env(config: &RedcConfig, mirror_stdout: bool) -> Result<ComposeEnv> {
    let projects_dir = config.projects_dir();
    let store: Arc<dyn CaseStore> = match config.store_backend {
        StoreBackend::Json => Arc::new(JsonCaseStore::new(&projects_dir, ProjectLocks::new())),
        StoreBackend::Redb => {
            std::fs::create_dir_all(&projects_dir)
                .with_context(|| format!("failed to create {}", projects_dir.display()))?;
            Arc::new(RedbCaseStore::open(projects_dir.join(REDB_FILE), &projects_dir)?)
        }
    };

    let backend = Arc::new(CliTofuBackend::new(&config.tofu_binary, Duration::from_secs(config.tofu_timeout_secs)));
    let registry = Arc::new(ProvisionerRegistry::with_defaults(backend, RetryPolicy::default()));

    Ok(ComposeEnv {
        store,
        registry,
        connector: Arc::new(SshCliConnector::new()),
        templates_dir: config.templates_dir(),
        mirror_stdout,
    })
}
