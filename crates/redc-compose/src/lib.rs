//! Multi-service compose orchestration.
//!
//! A compose file declares services (templates), their dependencies and
//! variables, and post-deployment setup tasks. This crate turns it into
//! provisioned cases:
//!
//! - [`context`]: per-run state, replica expansion and profile filtering
//! - [`resolver`]: `${service.outputs.key}` substitution with replica fan-out
//! - [`scheduler`]: fixed-point deploy and teardown with deadlock detection
//! - [`lifecycle`]: per-service provisioning and best-effort remote actions
//! - [`setup`]: setup tasks across replica instances
//! - [`inspect`]: dry-run plan preview
//! - [`orchestrator`]: the `up`, `down` and `config` entry points
//!
//! # Tiger Style
//!
//! - Pure scheduling and parsing decisions live in [`verified`]
//! - Only the entry points decide whether an error ends the run
//! - Every backend and session call takes a cancellation token

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod inspect;
pub mod lifecycle;
pub mod log_writer;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod setup;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod verified;

pub use context::ComposeContext;
pub use context::ComposeOptions;
pub use context::RuntimeService;
pub use context::ServiceMap;
pub use context::SetupTask;
pub use error::ComposeError;
pub use error::Result;
pub use error::Unresolved;
pub use inspect::ComposePlan;
pub use lifecycle::ComposeEnv;
pub use lifecycle::LifecycleDriver;
pub use model::ComposeFile;
pub use orchestrator::inspect_config;
pub use orchestrator::run_compose_down;
pub use orchestrator::run_compose_up;
pub use orchestrator::DownReport;
pub use orchestrator::UpReport;
pub use scheduler::DeployOutcome;
pub use scheduler::ServiceDeployer;
pub use session::SessionConnector;
pub use session::SshCliConnector;
