//! The [`CaseStore`] trait.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Case;
use crate::types::CaseState;
use crate::types::Project;

/// Durable storage for projects and their cases.
///
/// Every mutating method is a read-modify-write cycle executed under the
/// backend's exclusive lock, so concurrent writers from several processes
/// never lose each other's updates.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Directory where case workdirs of `project` live.
    fn project_dir(&self, project: &str) -> PathBuf;

    /// Load an existing project.
    async fn load_project(&self, name: &str) -> Result<Project>;

    /// Load a project, creating an empty one owned by `user` if absent.
    ///
    /// Fails with `AccessDenied` if the project belongs to another user.
    async fn load_or_create_project(&self, name: &str, user: &str) -> Result<Project>;

    /// Persist a project, merging with any cases written concurrently.
    async fn save_project(&self, project: &Project) -> Result<()>;

    /// Find a case by id, name, or unique id prefix.
    async fn get_case(&self, project: &str, identifier: &str) -> Result<Case> {
        let loaded = self.load_project(project).await?;
        loaded.find_case(identifier).cloned()
    }

    /// Find a case by exact logical name.
    async fn find_case_by_name(&self, project: &str, name: &str) -> Result<Option<Case>> {
        let loaded = self.load_project(project).await?;
        Ok(loaded.case_by_name(name).cloned())
    }

    /// Append a case record.
    async fn add_case(&self, project: &str, case: Case) -> Result<()>;

    /// Set a case's state and state timestamp.
    async fn update_case_state(&self, project: &str, id: &str, state: CaseState, timestamp: &str) -> Result<()>;

    /// Remove a case record. Removing an unknown id fails with `CaseNotFound`.
    async fn delete_case(&self, project: &str, id: &str) -> Result<()>;
}
