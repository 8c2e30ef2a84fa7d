//! Error types for provisioning.

use std::path::PathBuf;

use snafu::Snafu;

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, TofuError>;

/// Provisioning errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TofuError {
    /// The CLI binary could not be started.
    #[snafu(display("failed to run {command} in {}: {source}", work_dir.display()))]
    Spawn {
        /// Subcommand, e.g. `apply`.
        command: &'static str,
        /// Working directory.
        work_dir: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The CLI exited unsuccessfully.
    #[snafu(display("{command} failed in {}: {stderr}", work_dir.display()))]
    CommandFailed {
        /// Subcommand.
        command: &'static str,
        /// Working directory.
        work_dir: PathBuf,
        /// Captured stderr.
        stderr: String,
    },

    /// The command exceeded its deadline and was killed.
    #[snafu(display("{command} timed out after {timeout_secs}s"))]
    Timeout {
        /// Subcommand.
        command: &'static str,
        /// Deadline in seconds.
        timeout_secs: u64,
    },

    /// The caller canceled the operation.
    #[snafu(display("{command} canceled by caller"))]
    Canceled {
        /// Subcommand.
        command: &'static str,
    },

    /// `output -json` returned something other than an output map.
    #[snafu(display("failed to decode outputs from {}: {source}", work_dir.display()))]
    DecodeOutputs {
        /// Working directory.
        work_dir: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Apply failed twice, once before and once after a recovery destroy.
    #[snafu(display("apply failed after recovery in {}: {source}", work_dir.display()))]
    ApplyFailed {
        /// Working directory.
        work_dir: PathBuf,
        /// Error from the second apply.
        #[snafu(source(from(TofuError, Box::new)))]
        source: Box<TofuError>,
    },

    /// An operation failed on every allowed attempt.
    #[snafu(display("{command} failed after {attempts} attempts: {source}"))]
    AttemptsExhausted {
        /// Subcommand.
        command: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        #[snafu(source(from(TofuError, Box::new)))]
        source: Box<TofuError>,
    },

    /// No provisioner is registered for a template family.
    #[snafu(display("no provisioner registered for template family '{family}'"))]
    UnknownFamily {
        /// Family identifier.
        family: String,
    },

    /// Reading or writing template files failed.
    #[snafu(display("template io failed at {}: {source}", path.display()))]
    TemplateIo {
        /// File or directory path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Template manifest is not valid JSON.
    #[snafu(display("invalid template manifest {}: {source}", path.display()))]
    ParseManifest {
        /// Manifest path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Variables could not be serialized.
    #[snafu(display("failed to encode variables: {source}"))]
    EncodeVars {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

impl TofuError {
    /// Whether this error, or the error it wraps, is a caller cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            TofuError::Canceled { .. } => true,
            TofuError::ApplyFailed { source, .. } | TofuError::AttemptsExhausted { source, .. } => source.is_canceled(),
            _ => false,
        }
    }
}
