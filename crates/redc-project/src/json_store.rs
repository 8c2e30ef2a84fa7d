//! Flat-file JSON [`CaseStore`].
//!
//! Layout: `<root>/<project>/project.json`, with case workdirs as siblings.
//! File IO and the blocking OS lock run on the blocking pool.

use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use snafu::ResultExt;

use crate::error::CreateDirSnafu;
use crate::error::ParseProjectSnafu;
use crate::error::ProjectError;
use crate::error::ReadFileSnafu;
use crate::error::Result;
use crate::error::SerializeSnafu;
use crate::error::TaskJoinSnafu;
use crate::error::WriteFileSnafu;
use crate::locks::FileLockGuard;
use crate::locks::ProjectLocks;
use crate::store::CaseStore;
use crate::types::merge_cases;
use crate::types::Case;
use crate::types::CaseState;
use crate::types::Project;

/// Name of the per-project state file.
pub const PROJECT_FILE: &str = "project.json";

/// JSON file backed project store.
#[derive(Debug, Clone)]
pub struct JsonCaseStore {
    root: PathBuf,
    locks: ProjectLocks,
}

impl JsonCaseStore {
    /// Create a store rooted at `root`, sharing `locks` with other components.
    pub fn new(root: impl Into<PathBuf>, locks: ProjectLocks) -> Self {
        Self {
            root: root.into(),
            locks,
        }
    }

    fn project_file(&self, name: &str) -> PathBuf {
        self.root.join(name).join(PROJECT_FILE)
    }

    /// Run `f` on the project file while holding both the in-process and the
    /// cross-process lock.
    async fn with_locked_file<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.locks.lock(name).await;
        let dir = self.project_dir(name);
        let path = self.project_file(name);

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir.clone() })?;
            let _file_lock = FileLockGuard::acquire(&path)?;
            f(&path)
        })
        .await
        .context(TaskJoinSnafu)?
    }

    /// Read-modify-write an existing project.
    async fn update<F>(&self, name: &str, mutate: F) -> Result<()>
    where F: FnOnce(&mut Project) -> Result<()> + Send + 'static {
        let project_name = name.to_string();
        self.with_locked_file(name, move |path| {
            let mut project = read_project(path)?.ok_or(ProjectError::ProjectNotFound { name: project_name })?;
            mutate(&mut project)?;
            write_project(path, &project)
        })
        .await
    }
}

fn read_project(path: &Path) -> Result<Option<Project>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ProjectError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    if data.is_empty() {
        return Ok(None);
    }
    let project = serde_json::from_slice(&data).context(ParseProjectSnafu { path: path.to_path_buf() })?;
    Ok(Some(project))
}

fn write_project(path: &Path, project: &Project) -> Result<()> {
    let data = serde_json::to_vec_pretty(project).context(SerializeSnafu { what: "project" })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).context(WriteFileSnafu { path: tmp.clone() })?;
    std::fs::rename(&tmp, path).context(WriteFileSnafu { path: path.to_path_buf() })
}

#[async_trait]
impl CaseStore for JsonCaseStore {
    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    async fn load_project(&self, name: &str) -> Result<Project> {
        if !self.project_file(name).exists() {
            return Err(ProjectError::ProjectNotFound { name: name.to_string() });
        }
        let project_name = name.to_string();
        self.with_locked_file(name, move |path| {
            read_project(path)?.ok_or(ProjectError::ProjectNotFound { name: project_name })
        })
        .await
    }

    async fn load_or_create_project(&self, name: &str, user: &str) -> Result<Project> {
        let project_name = name.to_string();
        let project_dir = self.project_dir(name);
        let owner = user.to_string();
        let project = self
            .with_locked_file(name, move |path| match read_project(path)? {
                Some(existing) => Ok(existing),
                None => {
                    let created = Project::new(project_name, project_dir, owner);
                    write_project(path, &created)?;
                    tracing::info!(project = %created.project_name, "created project");
                    Ok(created)
                }
            })
            .await?;
        project.check_access(user)?;
        Ok(project)
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        let mut current = project.clone();
        self.with_locked_file(&project.project_name, move |path| {
            if let Some(on_disk) = read_project(path)? {
                current.cases = merge_cases(on_disk.cases, std::mem::take(&mut current.cases));
            }
            write_project(path, &current)
        })
        .await
    }

    async fn add_case(&self, project: &str, case: Case) -> Result<()> {
        self.update(project, move |p| {
            p.cases.push(case);
            Ok(())
        })
        .await
    }

    async fn update_case_state(&self, project: &str, id: &str, state: CaseState, timestamp: &str) -> Result<()> {
        let id = id.to_string();
        let timestamp = timestamp.to_string();
        self.update(project, move |p| {
            let project_name = p.project_name.clone();
            let case = p.cases.iter_mut().find(|c| c.id == id).ok_or(ProjectError::CaseNotFound {
                project: project_name,
                identifier: id,
            })?;
            case.state = state;
            case.state_time = timestamp;
            Ok(())
        })
        .await
    }

    async fn delete_case(&self, project: &str, id: &str) -> Result<()> {
        let id = id.to_string();
        self.update(project, move |p| {
            let before = p.cases.len();
            p.cases.retain(|c| c.id != id);
            if p.cases.len() == before {
                return Err(ProjectError::CaseNotFound {
                    project: p.project_name.clone(),
                    identifier: id,
                });
            }
            Ok(())
        })
        .await
    }
}
