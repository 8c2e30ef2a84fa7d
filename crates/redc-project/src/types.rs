//! Project and case records.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ProjectError;
use crate::error::Result;

/// Lifecycle state of a provisioned case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseState {
    /// Workdir prepared, nothing applied yet.
    #[default]
    Created,
    /// Apply succeeded.
    Running,
    /// Destroyed, record kept for history.
    Stopped,
    /// Last operation failed.
    Error,
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaseState::Created => "created",
            CaseState::Running => "running",
            CaseState::Stopped => "stopped",
            CaseState::Error => "error",
        };
        f.write_str(s)
    }
}

/// One provisioned template instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Generated UUID.
    pub id: String,
    /// Logical name; compose services use their instance name.
    pub name: String,
    /// Template identifier the case was created from.
    #[serde(rename = "type")]
    pub template: String,
    /// Optional module tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// User that created the case.
    pub operator: String,
    /// Working directory holding the copied template.
    pub path: PathBuf,
    /// Node count hint for multi-node templates.
    #[serde(default)]
    pub node: u32,
    /// Creation time, `YYYY-MM-DD HH:MM:SS`.
    pub create_time: String,
    /// Time of the last state change.
    pub state_time: String,
    /// Free-form `key=value` parameters recorded at creation.
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<String>,
    /// Current lifecycle state.
    #[serde(default)]
    pub state: CaseState,
}

impl Case {
    /// Build a fresh case record in [`CaseState::Created`] with a new UUID.
    pub fn new(name: impl Into<String>, template: impl Into<String>, operator: impl Into<String>, path: PathBuf) -> Self {
        let now = redc_core::time::now_timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            template: template.into(),
            module: None,
            operator: operator.into(),
            path,
            node: 0,
            create_time: now.clone(),
            state_time: now,
            parameters: Vec::new(),
            state: CaseState::Created,
        }
    }
}

/// A named group of cases owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name, unique within a store.
    pub project_name: String,
    /// Directory holding case workdirs.
    pub project_path: PathBuf,
    /// Creation time, `YYYY-MM-DD HH:MM:SS`.
    pub create_time: String,
    /// Owning user.
    pub user: String,
    /// Case records in insertion order.
    #[serde(default, rename = "case")]
    pub cases: Vec<Case>,
}

impl Project {
    /// Create an empty project record.
    pub fn new(name: impl Into<String>, path: PathBuf, user: impl Into<String>) -> Self {
        Self {
            project_name: name.into(),
            project_path: path,
            create_time: redc_core::time::now_timestamp(),
            user: user.into(),
            cases: Vec::new(),
        }
    }

    /// Check that `user` may operate on this project. `system` may access any project.
    pub fn check_access(&self, user: &str) -> Result<()> {
        if self.user != user && user != SYSTEM_USER {
            return Err(ProjectError::AccessDenied {
                user: user.to_string(),
                project: self.project_name.clone(),
            });
        }
        Ok(())
    }

    /// Find a case by exact id or name, falling back to a unique id prefix.
    pub fn find_case(&self, identifier: &str) -> Result<&Case> {
        if let Some(case) = self.cases.iter().find(|c| c.id == identifier || c.name == identifier) {
            return Ok(case);
        }

        let candidates: Vec<&Case> = self.cases.iter().filter(|c| c.id.starts_with(identifier)).collect();
        match candidates.as_slice() {
            [] => Err(ProjectError::CaseNotFound {
                project: self.project_name.clone(),
                identifier: identifier.to_string(),
            }),
            [only] => {
                tracing::debug!(identifier, case_id = %only.id, name = %only.name, "matched case by id prefix");
                Ok(only)
            }
            many => Err(ProjectError::AmbiguousCase {
                identifier: identifier.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Find a case whose logical name matches exactly.
    pub fn case_by_name(&self, name: &str) -> Option<&Case> {
        self.cases.iter().find(|c| c.name == name)
    }
}

/// User name that bypasses project ownership checks.
pub const SYSTEM_USER: &str = "system";

/// Merge the in-memory case list over the one last written to disk.
///
/// Entries from `current` win; entries that only exist on disk are appended
/// so a concurrent writer's additions survive.
pub fn merge_cases(on_disk: Vec<Case>, current: Vec<Case>) -> Vec<Case> {
    let mut merged = current;
    for case in on_disk {
        if !merged.iter().any(|c| c.id == case.id) {
            merged.push(case);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case_with_id(id: &str, name: &str) -> Case {
        let mut case = Case::new(name, "base/ecs", "alice", PathBuf::from("/tmp"));
        case.id = id.to_string();
        case
    }

    fn project_with(cases: Vec<Case>) -> Project {
        let mut project = Project::new("demo", PathBuf::from("/tmp/demo"), "alice");
        project.cases = cases;
        project
    }

    #[test]
    fn test_find_case_exact_name_wins_over_prefix() {
        let project = project_with(vec![case_with_id("abc123", "web"), case_with_id("web999", "db")]);
        assert_eq!(project.find_case("web").unwrap().id, "abc123");
    }

    #[test]
    fn test_find_case_unique_prefix() {
        let project = project_with(vec![case_with_id("abc123", "web"), case_with_id("def456", "db")]);
        assert_eq!(project.find_case("de").unwrap().name, "db");
    }

    #[test]
    fn test_find_case_ambiguous_prefix() {
        let project = project_with(vec![case_with_id("abc123", "web"), case_with_id("abd456", "db")]);
        assert!(matches!(project.find_case("ab"), Err(ProjectError::AmbiguousCase { count: 2, .. })));
    }

    #[test]
    fn test_find_case_missing() {
        let project = project_with(vec![]);
        assert!(matches!(project.find_case("x"), Err(ProjectError::CaseNotFound { .. })));
    }

    #[test]
    fn test_merge_prefers_current_and_keeps_disk_only() {
        let mut updated = case_with_id("1", "web");
        updated.state = CaseState::Running;
        let merged = merge_cases(vec![case_with_id("1", "web"), case_with_id("2", "db")], vec![updated]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].state, CaseState::Running);
        assert_eq!(merged[1].id, "2");
    }

    #[test]
    fn test_access_check() {
        let project = project_with(vec![]);
        assert!(project.check_access("alice").is_ok());
        assert!(project.check_access(SYSTEM_USER).is_ok());
        assert!(matches!(project.check_access("bob"), Err(ProjectError::AccessDenied { .. })));
    }

    #[test]
    fn test_case_json_field_names() {
        let case = case_with_id("1", "web");
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["type"], "base/ecs");
        assert_eq!(json["state"], "created");
        assert!(json.get("parameter").is_some());
    }
}
