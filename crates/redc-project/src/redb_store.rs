//! Embedded key-value [`CaseStore`] backed by redb.
//!
//! Two tables: `projects` maps a project name to its JSON header (cases
//! stripped), `cases` maps `<project>/<case id>` to a JSON case. redb
//! serializes write transactions, so each mutation is atomic with respect to
//! other writers on the same database.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;
use snafu::ResultExt;

use crate::error::BeginTransactionSnafu;
use crate::error::CommitSnafu;
use crate::error::DeserializeSnafu;
use crate::error::OpenDatabaseSnafu;
use crate::error::OpenTableSnafu;
use crate::error::ProjectError;
use crate::error::Result;
use crate::error::SerializeSnafu;
use crate::error::TableAccessSnafu;
use crate::error::TaskJoinSnafu;
use crate::store::CaseStore;
use crate::types::Case;
use crate::types::CaseState;
use crate::types::Project;

const PROJECTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");
const CASES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cases");

/// redb backed project store.
#[derive(Clone)]
pub struct RedbCaseStore {
    db: Arc<Database>,
    projects_root: PathBuf,
}

impl std::fmt::Debug for RedbCaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCaseStore").field("projects_root", &self.projects_root).finish_non_exhaustive()
    }
}

fn case_key(project: &str, id: &str) -> String {
    format!("{project}/{id}")
}

impl RedbCaseStore {
    /// Open or create the database at `db_path`. Case workdirs are placed under
    /// `projects_root/<project>`.
    pub fn open(db_path: impl AsRef<Path>, projects_root: impl Into<PathBuf>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let db = Database::create(&path).context(OpenDatabaseSnafu { path: path.clone() })?;

        // Create tables up front so read transactions never see them missing.
        let txn = db.begin_write().context(BeginTransactionSnafu)?;
        {
            txn.open_table(PROJECTS_TABLE).context(OpenTableSnafu)?;
            txn.open_table(CASES_TABLE).context(OpenTableSnafu)?;
        }
        txn.commit().context(CommitSnafu)?;

        Ok(Self {
            db: Arc::new(db),
            projects_root: projects_root.into(),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await.context(TaskJoinSnafu)?
    }
}

fn read_project(db: &Database, name: &str) -> Result<Option<Project>> {
    let txn = db.begin_read().context(BeginTransactionSnafu)?;
    let projects = txn.open_table(PROJECTS_TABLE).context(OpenTableSnafu)?;
    let Some(header) = projects.get(name).context(TableAccessSnafu)? else {
        return Ok(None);
    };
    let mut project: Project = serde_json::from_slice(header.value()).context(DeserializeSnafu { what: "project" })?;

    let cases = txn.open_table(CASES_TABLE).context(OpenTableSnafu)?;
    let prefix = format!("{name}/");
    let mut loaded: Vec<Case> = Vec::new();
    for item in cases.range(prefix.as_str()..).context(TableAccessSnafu)? {
        let (key, value) = item.context(TableAccessSnafu)?;
        if !key.value().starts_with(&prefix) {
            break;
        }
        loaded.push(serde_json::from_slice(value.value()).context(DeserializeSnafu { what: "case" })?);
    }
    // Keys sort by id; present cases in creation order like the JSON store.
    loaded.sort_by(|a, b| a.create_time.cmp(&b.create_time));
    project.cases = loaded;
    Ok(Some(project))
}

fn write_header(txn: &redb::WriteTransaction, project: &Project) -> Result<()> {
    let mut header = project.clone();
    header.cases.clear();
    let bytes = serde_json::to_vec(&header).context(SerializeSnafu { what: "project" })?;
    let mut projects = txn.open_table(PROJECTS_TABLE).context(OpenTableSnafu)?;
    projects.insert(project.project_name.as_str(), bytes.as_slice()).context(TableAccessSnafu)?;
    Ok(())
}

fn write_case(txn: &redb::WriteTransaction, project: &str, case: &Case) -> Result<()> {
    let bytes = serde_json::to_vec(case).context(SerializeSnafu { what: "case" })?;
    let mut cases = txn.open_table(CASES_TABLE).context(OpenTableSnafu)?;
    cases.insert(case_key(project, &case.id).as_str(), bytes.as_slice()).context(TableAccessSnafu)?;
    Ok(())
}

fn project_exists(txn: &redb::WriteTransaction, name: &str) -> Result<bool> {
    let projects = txn.open_table(PROJECTS_TABLE).context(OpenTableSnafu)?;
    let exists = projects.get(name).context(TableAccessSnafu)?.is_some();
    Ok(exists)
}

fn read_case(txn: &redb::WriteTransaction, project: &str, id: &str) -> Result<Option<Case>> {
    let cases = txn.open_table(CASES_TABLE).context(OpenTableSnafu)?;
    let value = cases.get(case_key(project, id).as_str()).context(TableAccessSnafu)?;
    let case = match value {
        Some(bytes) => Some(serde_json::from_slice(bytes.value()).context(DeserializeSnafu { what: "case" })?),
        None => None,
    };
    Ok(case)
}

#[async_trait]
impl CaseStore for RedbCaseStore {
    fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_root.join(project)
    }

    async fn load_project(&self, name: &str) -> Result<Project> {
        let name = name.to_string();
        self.blocking(move |db| read_project(db, &name)?.ok_or(ProjectError::ProjectNotFound { name })).await
    }

    async fn load_or_create_project(&self, name: &str, user: &str) -> Result<Project> {
        let project_name = name.to_string();
        let owner = user.to_string();
        let project_dir = self.project_dir(name);
        let project = self
            .blocking(move |db| {
                let txn = db.begin_write().context(BeginTransactionSnafu)?;
                if !project_exists(&txn, &project_name)? {
                    let created = Project::new(project_name.clone(), project_dir, owner);
                    write_header(&txn, &created)?;
                    tracing::info!(project = %project_name, "created project");
                }
                txn.commit().context(CommitSnafu)?;
                read_project(db, &project_name)?.ok_or(ProjectError::ProjectNotFound { name: project_name })
            })
            .await?;
        project.check_access(user)?;
        Ok(project)
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        let project = project.clone();
        self.blocking(move |db| {
            let txn = db.begin_write().context(BeginTransactionSnafu)?;
            write_header(&txn, &project)?;
            // Cases present only in the database are left untouched, which is
            // the same merge rule the JSON store applies.
            for case in &project.cases {
                write_case(&txn, &project.project_name, case)?;
            }
            txn.commit().context(CommitSnafu)
        })
        .await
    }

    async fn add_case(&self, project: &str, case: Case) -> Result<()> {
        let project = project.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().context(BeginTransactionSnafu)?;
            if !project_exists(&txn, &project)? {
                return Err(ProjectError::ProjectNotFound { name: project });
            }
            write_case(&txn, &project, &case)?;
            txn.commit().context(CommitSnafu)
        })
        .await
    }

    async fn update_case_state(&self, project: &str, id: &str, state: CaseState, timestamp: &str) -> Result<()> {
        let project = project.to_string();
        let id = id.to_string();
        let timestamp = timestamp.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().context(BeginTransactionSnafu)?;
            let Some(mut case) = read_case(&txn, &project, &id)? else {
                return Err(ProjectError::CaseNotFound {
                    project,
                    identifier: id,
                });
            };
            case.state = state;
            case.state_time = timestamp;
            write_case(&txn, &project, &case)?;
            txn.commit().context(CommitSnafu)
        })
        .await
    }

    async fn delete_case(&self, project: &str, id: &str) -> Result<()> {
        let project = project.to_string();
        let id = id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().context(BeginTransactionSnafu)?;
            let removed = {
                let mut cases = txn.open_table(CASES_TABLE).context(OpenTableSnafu)?;
                let removed = cases.remove(case_key(&project, &id).as_str()).context(TableAccessSnafu)?;
                removed.is_some()
            };
            if !removed {
                return Err(ProjectError::CaseNotFound {
                    project,
                    identifier: id,
                });
            }
            txn.commit().context(CommitSnafu)
        })
        .await
    }
}
