//! Post-deployment setup tasks.
//!
//! Each task targets every deployed instance of a raw service name. A failing
//! command stops the remaining commands of that instance only; other
//! instances and later tasks still run.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::context::RuntimeService;
use crate::context::ServiceMap;
use crate::context::SetupTask;
use crate::error::log_best_effort;
use crate::error::ComposeError;
use crate::error::Result;
use crate::log_writer::join_log_writer;
use crate::log_writer::spawn_log_writer;
use crate::resolver::resolve;
use crate::session::SessionConfig;
use crate::session::SessionConnector;

/// Outcome counts of one setup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupSummary {
    /// Tasks with no deployed target.
    pub skipped_tasks: usize,
    /// Instances whose commands all succeeded.
    pub succeeded: usize,
    /// Instances that could not be prepared or whose commands failed.
    pub failed: usize,
}

/// Runs setup tasks over remote sessions.
pub struct SetupRunner {
    connector: Arc<dyn SessionConnector>,
    log_path: PathBuf,
    mirror_stdout: bool,
}

impl SetupRunner {
    /// Runner writing command output to `log_path`.
    pub fn new(connector: Arc<dyn SessionConnector>, log_path: PathBuf, mirror_stdout: bool) -> Self {
        Self {
            connector,
            log_path,
            mirror_stdout,
        }
    }

    /// Run every task in order, recording outputs on the task records.
    ///
    /// Only cancellation is returned as an error.
    pub async fn run(
        &self,
        tasks: &mut [SetupTask],
        services: &ServiceMap,
        cancel: &CancellationToken,
    ) -> Result<SetupSummary> {
        let mut summary = SetupSummary::default();

        for task in tasks.iter_mut() {
            let targets: Vec<&RuntimeService> =
                services.values().filter(|s| s.raw_name == task.service && s.is_deployed).collect();
            if targets.is_empty() {
                warn!(task = %task.name, service = %task.service, "setup task skipped: no deployed instances");
                summary.skipped_tasks += 1;
                continue;
            }
            info!(task = %task.name, service = %task.service, instances = targets.len(), "running setup task");

            for target in targets {
                if cancel.is_cancelled() {
                    return Err(ComposeError::Canceled);
                }
                let result = self.run_on_instance(task, target, services, cancel).await;
                if matches!(result, Err(ComposeError::Canceled)) {
                    return Err(ComposeError::Canceled);
                }
                match log_best_effort("setup task", &target.name, result) {
                    Some(()) => summary.succeeded += 1,
                    None => summary.failed += 1,
                }
            }
        }

        Ok(summary)
    }

    async fn run_on_instance(
        &self,
        task: &mut SetupTask,
        target: &RuntimeService,
        services: &ServiceMap,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let commands = resolve(&task.command, services, Some(target)).map_err(|reason| {
            ComposeError::UnresolvedReference {
                service: target.name.clone(),
                expression: task.command.clone(),
                reason,
            }
        })?;
        let config = SessionConfig::from_outputs(&target.name, &target.outputs)?;
        let session = self.connector.connect(&config, cancel).await?;

        let mut outcome = Ok(());
        for command in &commands {
            info!(task = %task.name, service = %target.name, command = %command, "setup command");
            let (tx, writer) = spawn_log_writer(self.log_path.clone(), self.mirror_stdout);
            let result = session.run_command(command, tx, cancel).await;
            let captured =
                log_best_effort("log writer", &target.name, join_log_writer(writer).await).unwrap_or_default();
            task.outputs = captured.trim().to_string();

            if let Err(e) = result {
                error!(task = %task.name, service = %target.name, error = %e, output = %task.outputs, "setup command failed");
                outcome = Err(e);
                break;
            }
        }

        log_best_effort("close", &target.name, session.close().await);
        outcome
    }
}
