//! Error types for compose orchestration.
//!
//! The orchestration entry points are the only place that decides whether an
//! error ends the run. Components return these variants unchanged; side
//! actions that must not stop a deployment go through [`log_best_effort`].

use std::fmt;
use std::path::PathBuf;

use redc_project::ProjectError;
use redc_tofu::TofuError;
use snafu::Snafu;
use tracing::warn;

/// Result type for compose operations.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Why a `${service.outputs.key}` reference could not be substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// No instance matches the referenced name.
    ServiceNotFound {
        /// Referenced name.
        name: String,
    },
    /// The matched instance has not been deployed yet.
    ServiceNotDeployed {
        /// Instance name.
        name: String,
    },
    /// The matched instance has no output under the key.
    OutputMissing {
        /// Instance name.
        service: String,
        /// Output key.
        key: String,
    },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::ServiceNotFound { name } => write!(f, "referenced service '{name}' not found or not active"),
            Unresolved::ServiceNotDeployed { name } => write!(f, "referenced service '{name}' is not deployed"),
            Unresolved::OutputMissing { service, key } => write!(f, "output key '{key}' missing in {service}"),
        }
    }
}

/// Compose errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ComposeError {
    // ========================================================================
    // Compose File Errors
    // ========================================================================
    /// The compose file could not be read.
    #[snafu(display("failed to read compose file {}: {source}", path.display()))]
    ReadComposeFile {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The compose file is not valid YAML for the compose model.
    #[snafu(display("failed to parse compose file {}: {source}", path.display()))]
    ParseComposeFile {
        /// File path.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The compose file parsed but is semantically invalid.
    #[snafu(display("invalid compose file: {message}"))]
    InvalidCompose {
        /// What is wrong.
        message: String,
    },

    /// Two services expand to the same instance name.
    #[snafu(display("instance name '{name}' is produced by both service {first} and service {second}"))]
    DuplicateInstance {
        /// Colliding instance name.
        name: String,
        /// Service that produced the name first.
        first: String,
        /// Service that produced it again.
        second: String,
    },

    /// A `file:` config could not be read.
    #[snafu(display("failed to read config '{key}' from {}: {source}", path.display()))]
    ReadConfigFile {
        /// Config key.
        key: String,
        /// Resolved file path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// An `env:` config names an unset variable.
    #[snafu(display("config '{key}' requires environment variable {var}"))]
    ConfigEnvMissing {
        /// Config key.
        key: String,
        /// Variable name.
        var: String,
    },

    /// A service names a template that does not exist.
    #[snafu(display("template '{template}' for service {service} not found at {}", path.display()))]
    TemplateNotFound {
        /// Service name.
        service: String,
        /// Template name.
        template: String,
        /// Expected location.
        path: PathBuf,
    },

    // ========================================================================
    // Scheduling Errors
    // ========================================================================
    /// A scheduling pass made no progress while work remained.
    #[snafu(display(
        "{direction} deadlock: cyclic dependency or dependency filtered out by profile; pending: {}",
        pending.join(", ")
    ))]
    Deadlock {
        /// `deploy` or `destroy`.
        direction: &'static str,
        /// Services still waiting.
        pending: Vec<String>,
    },

    /// A variable reference could not be resolved for a service.
    #[snafu(display("service {service}: cannot resolve '{expression}': {reason}"))]
    UnresolvedReference {
        /// Requesting service.
        service: String,
        /// Offending expression.
        expression: String,
        /// Reason.
        reason: Unresolved,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// The project store failed.
    #[snafu(display("project store error: {source}"))]
    Project {
        /// Underlying store error.
        source: ProjectError,
    },

    /// The provisioning backend failed for a service.
    #[snafu(display("provisioning {service} failed: {source}"))]
    Provision {
        /// Service name.
        service: String,
        /// Underlying backend error.
        source: TofuError,
    },

    /// Outputs carry no usable remote host.
    #[snafu(display("service {service} exposes no ssh host output"))]
    NoSessionTarget {
        /// Service name.
        service: String,
    },

    /// A remote session operation failed.
    #[snafu(display("{action} on {host} failed: {message}"))]
    Session {
        /// `connect`, `upload`, `download` or `run`.
        action: &'static str,
        /// Remote host.
        host: String,
        /// Failure text.
        message: String,
    },

    /// The task writing a command log stopped abnormally.
    #[snafu(display("command log writer failed: {source}"))]
    LogWriter {
        /// Join failure of the writer task.
        source: tokio::task::JoinError,
    },

    /// A local IO operation failed.
    #[snafu(display("{action} {}: {source}", path.display()))]
    LocalIo {
        /// What was attempted.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The caller canceled the operation.
    #[snafu(display("compose operation canceled by caller"))]
    Canceled,
}

impl ComposeError {
    /// Whether the caller canceled the operation.
    pub fn is_canceled(&self) -> bool {
        match self {
            ComposeError::Canceled => true,
            ComposeError::Provision { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// Whether this is a deadlock.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, ComposeError::Deadlock { .. })
    }
}

/// Log a failed side action and continue.
///
/// Uploads, init commands, downloads and setup commands are best effort:
/// their failures are reported here and never propagate.
pub fn log_best_effort<T>(action: &str, service: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(service, action, error = %err, "side action failed; continuing");
            None
        }
    }
}
