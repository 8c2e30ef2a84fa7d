//! Compose entry points.
//!
//! These are the only functions that decide whether an error ends a run.
//! Everything below them returns errors unchanged or, for side actions,
//! logs and continues.

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::ComposeContext;
use crate::context::ComposeOptions;
use crate::context::SetupTask;
use crate::error::ProjectSnafu;
use crate::error::Result;
use crate::inspect::ComposePlan;
use crate::lifecycle::verify_templates;
use crate::lifecycle::ComposeEnv;
use crate::lifecycle::LifecycleDriver;
use crate::log_writer::log_path;
use crate::log_writer::SETUP_LOG;
use crate::scheduler::deploy_all;
use crate::scheduler::destroy_all;
use crate::scheduler::rehydrate_all;
use crate::setup::SetupRunner;
use crate::setup::SetupSummary;

/// Result of `compose up`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpReport {
    /// Instances deployed, in order.
    pub deployed: Vec<String>,
    /// Setup tasks with their captured outputs.
    pub setup: Vec<SetupTask>,
    /// Setup outcome counts.
    pub setup_summary: SetupSummary,
}

/// Result of `compose down`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownReport {
    /// Instances that had a case record.
    pub found: usize,
    /// Instances destroyed, in order.
    pub destroyed: Vec<String>,
}

/// Deploy every active service in dependency order, then run setup tasks.
pub async fn run_compose_up(options: ComposeOptions, env: &ComposeEnv, cancel: &CancellationToken) -> Result<UpReport> {
    let mut ctx = ComposeContext::build(options).await?;
    env.store.load_or_create_project(&ctx.options.project, &ctx.options.user).await.context(ProjectSnafu)?;
    verify_templates(&ctx.services, &env.templates_dir).await?;

    info!(
        project = %ctx.options.project,
        instances = ctx.services.len(),
        setup_tasks = ctx.setup.len(),
        "compose up"
    );

    let driver = LifecycleDriver::new(env.clone(), &ctx);
    let deployed = deploy_all(&mut ctx.services, &driver, cancel).await?;

    let mut setup_summary = SetupSummary::default();
    if !ctx.setup.is_empty() {
        info!(tasks = ctx.setup.len(), "running setup tasks");
        let project_dir = env.store.project_dir(&ctx.options.project);
        let runner = SetupRunner::new(env.connector.clone(), log_path(&project_dir, SETUP_LOG), env.mirror_stdout);
        setup_summary = runner.run(&mut ctx.setup, &ctx.services, cancel).await?;
    }

    info!(project = %ctx.options.project, deployed = deployed.len(), "compose up finished");
    Ok(UpReport {
        deployed,
        setup: ctx.setup,
        setup_summary,
    })
}

/// Destroy every active service that has a case record, dependents first.
pub async fn run_compose_down(
    options: ComposeOptions,
    env: &ComposeEnv,
    cancel: &CancellationToken,
) -> Result<DownReport> {
    let mut ctx = ComposeContext::build(options).await?;
    env.store.load_or_create_project(&ctx.options.project, &ctx.options.user).await.context(ProjectSnafu)?;

    let driver = LifecycleDriver::new(env.clone(), &ctx);
    let found = rehydrate_all(&mut ctx.services, &driver, cancel).await?;
    info!(project = %ctx.options.project, found, "compose down");

    let destroyed = destroy_all(&mut ctx.services, &driver, cancel).await?;
    info!(project = %ctx.options.project, destroyed = destroyed.len(), "compose down finished");
    Ok(DownReport { found, destroyed })
}

/// Build the dry-run plan for the compose file. Touches nothing but the
/// compose file and its configs.
pub async fn inspect_config(options: ComposeOptions) -> Result<ComposePlan> {
    let ctx = ComposeContext::build(options).await?;
    Ok(ComposePlan::from_context(&ctx))
}
