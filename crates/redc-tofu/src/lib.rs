//! Provisioning backend for redc cases.
//!
//! A case is a copied infrastructure template in its own working directory.
//! This crate drives it through the external IaC CLI:
//!
//! - [`ProvisionBackend`]: the raw `init/apply/destroy/output/show` surface,
//!   every call taking a [`CancellationToken`](tokio_util::sync::CancellationToken).
//! - [`Provisionable`]: the per-template-family lifecycle (`apply`, `destroy`,
//!   `change`) with the recovery policy built in.
//! - [`ProvisionerRegistry`]: maps a template family to its [`Provisionable`].
//!
//! # Tiger Style
//!
//! - Every external command is bounded by a timeout
//! - Cancellation is a distinct error, never retried

#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod provision;
pub mod registry;
pub mod template;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::CliTofuBackend;
pub use backend::ProvisionBackend;
pub use backend::TofuOutput;
pub use error::Result;
pub use error::TofuError;
pub use provision::Provisionable;
pub use provision::ProvisionUnit;
pub use provision::RetryPolicy;
pub use provision::StagedProvisioner;
pub use provision::StandardProvisioner;
pub use registry::ProvisionerRegistry;
pub use template::TemplateManifest;
