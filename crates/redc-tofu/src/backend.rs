//! OpenTofu/Terraform execution abstraction.
//!
//! The [`ProvisionBackend`] trait decouples lifecycle logic from the CLI so it
//! can be tested without a tofu installation.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use snafu::ResultExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::CommandFailedSnafu;
use crate::error::DecodeOutputsSnafu;
use crate::error::Result;
use crate::error::SpawnSnafu;
use crate::error::TofuError;

/// Default deadline for a single CLI invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Output from a tofu command execution.
#[derive(Debug, Clone)]
pub struct TofuOutput {
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl From<std::process::Output> for TofuOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// The provisioning CLI surface.
///
/// Every call accepts a cancellation token; a canceled call returns
/// [`TofuError::Canceled`] promptly and leaves no child process behind.
#[async_trait]
pub trait ProvisionBackend: Send + Sync {
    /// Initialize providers and modules in `work_dir`.
    async fn init(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput>;

    /// Create or update infrastructure.
    async fn apply(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput>;

    /// Destroy infrastructure.
    async fn destroy(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput>;

    /// Declared outputs as `name -> raw JSON text of the value`.
    async fn output(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<BTreeMap<String, String>>;

    /// Human-readable current state.
    async fn show(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<String>;
}

/// CLI-based backend invoking `tofu` (or a compatible binary).
#[derive(Debug, Clone)]
pub struct CliTofuBackend {
    binary: String,
    timeout: Duration,
}

impl CliTofuBackend {
    /// Create a backend running `binary` with the given per-command deadline.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(
        &self,
        command: &'static str,
        args: &[&str],
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TofuOutput> {
        tracing::debug!(binary = %self.binary, command, work_dir = %work_dir.display(), "running provisioning command");

        let child = Command::new(&self.binary)
            .arg(command)
            .args(args)
            .current_dir(work_dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                command,
                work_dir: work_dir.to_path_buf(),
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            result = child.wait_with_output() => result.context(SpawnSnafu { command, work_dir: work_dir.to_path_buf() })?,
            _ = cancel.cancelled() => return Err(TofuError::Canceled { command }),
            _ = tokio::time::sleep(self.timeout) => {
                return Err(TofuError::Timeout { command, timeout_secs: self.timeout.as_secs() });
            }
        };

        let output = TofuOutput::from(output);
        if !output.success {
            return CommandFailedSnafu {
                command,
                work_dir: work_dir.to_path_buf(),
                stderr: output.stderr.trim().to_string(),
            }
            .fail();
        }
        Ok(output)
    }
}

impl Default for CliTofuBackend {
    fn default() -> Self {
        Self::new("tofu", DEFAULT_COMMAND_TIMEOUT)
    }
}

#[derive(Deserialize)]
struct OutputMeta {
    value: serde_json::Value,
}

/// Decode `output -json` into `name -> raw JSON value text`.
pub fn decode_output_json(work_dir: &Path, stdout: &str) -> Result<BTreeMap<String, String>> {
    if stdout.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let metas: BTreeMap<String, OutputMeta> =
        serde_json::from_str(stdout).context(DecodeOutputsSnafu { work_dir: work_dir.to_path_buf() })?;
    Ok(metas.into_iter().map(|(name, meta)| (name, meta.value.to_string())).collect())
}

#[async_trait]
impl ProvisionBackend for CliTofuBackend {
    async fn init(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        self.run("init", &["-input=false", "-no-color"], work_dir, cancel).await
    }

    async fn apply(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        self.run("apply", &["-auto-approve", "-input=false", "-no-color"], work_dir, cancel).await
    }

    async fn destroy(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        self.run("destroy", &["-auto-approve", "-input=false", "-no-color"], work_dir, cancel).await
    }

    async fn output(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<BTreeMap<String, String>> {
        let output = self.run("output", &["-json", "-no-color"], work_dir, cancel).await?;
        decode_output_json(work_dir, &output.stdout)
    }

    async fn show(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<String> {
        let output = self.run("show", &["-no-color"], work_dir, cancel).await?;
        Ok(output.stdout)
    }
}
