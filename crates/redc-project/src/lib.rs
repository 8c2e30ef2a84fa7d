//! Durable project and case records.
//!
//! A *project* groups the *cases* (provisioned template instances) created
//! on behalf of one user. Two interchangeable backends implement
//! [`CaseStore`]:
//!
//! - [`JsonCaseStore`]: one pretty-printed `project.json` per project
//!   directory. Every read-modify-write runs under the per-project mutex from
//!   [`ProjectLocks`] and an exclusive cross-process file lock.
//! - [`RedbCaseStore`]: a single redb database; each mutation is one write
//!   transaction.
//!
//! # Tiger Style
//!
//! - Explicit error types with path context
//! - No process-global state: lock registries are owned by the store

#![warn(missing_docs)]

pub mod error;
pub mod json_store;
pub mod locks;
pub mod redb_store;
pub mod store;
pub mod types;

pub use error::ProjectError;
pub use error::Result;
pub use json_store::JsonCaseStore;
pub use locks::ProjectLocks;
pub use redb_store::RedbCaseStore;
pub use store::CaseStore;
pub use types::Case;
pub use types::CaseState;
pub use types::Project;
