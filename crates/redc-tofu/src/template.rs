//! Template manifests and case workdir preparation.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

use crate::error::EncodeVarsSnafu;
use crate::error::ParseManifestSnafu;
use crate::error::Result;
use crate::error::TemplateIoSnafu;

/// File name of the optional manifest at the root of a template.
pub const MANIFEST_FILE: &str = "case.json";

/// File the resolved variables are written to inside a case workdir.
pub const TFVARS_FILE: &str = "terraform.tfvars.json";

/// Family used when a template has no manifest.
pub const STANDARD_FAMILY: &str = "standard";

/// Template metadata read from `case.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateManifest {
    /// Provisioner family, e.g. `standard` or `staged`.
    #[serde(default = "default_family")]
    pub family: String,
    /// Ordered sub-directories for staged templates.
    #[serde(default)]
    pub stages: Vec<String>,
    /// Free-form description shown in previews.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_family() -> String {
    STANDARD_FAMILY.to_string()
}

impl Default for TemplateManifest {
    fn default() -> Self {
        Self {
            family: default_family(),
            stages: Vec::new(),
            description: None,
        }
    }
}

impl TemplateManifest {
    /// Read `case.json` from `dir`, or the default manifest if it is absent.
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).context(ParseManifestSnafu { path }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).context(TemplateIoSnafu { path }),
        }
    }
}

/// Recursively copy a template directory into a fresh case workdir.
///
/// Hidden provider caches (`.terraform`) are skipped.
pub async fn copy_template(from: &Path, to: &Path) -> Result<()> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir(&from, &to))
        .await
        .map_err(std::io::Error::other)
        .context(TemplateIoSnafu { path: PathBuf::new() })?
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).context(TemplateIoSnafu { path: to.to_path_buf() })?;
    let entries = std::fs::read_dir(from).context(TemplateIoSnafu { path: from.to_path_buf() })?;
    for entry in entries {
        let entry = entry.context(TemplateIoSnafu { path: from.to_path_buf() })?;
        let source = entry.path();
        if entry.file_name() == ".terraform" {
            continue;
        }
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().context(TemplateIoSnafu { path: source.clone() })?;
        if file_type.is_dir() {
            copy_dir(&source, &target)?;
        } else {
            std::fs::copy(&source, &target).context(TemplateIoSnafu { path: source.clone() })?;
        }
    }
    Ok(())
}

/// Write resolved variables as `terraform.tfvars.json` in `work_dir`.
///
/// Staged templates get a copy in every stage directory.
pub async fn write_tfvars(work_dir: &Path, stages: &[String], vars: &BTreeMap<String, String>) -> Result<()> {
    let data = serde_json::to_vec_pretty(vars).context(EncodeVarsSnafu)?;
    let mut dirs = vec![work_dir.to_path_buf()];
    dirs.extend(stages.iter().map(|stage| work_dir.join(stage)));
    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        let path = dir.join(TFVARS_FILE);
        tokio::fs::write(&path, &data).await.context(TemplateIoSnafu { path })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manifest_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = TemplateManifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.family, STANDARD_FAMILY);
        assert!(manifest.stages.is_empty());
    }

    #[tokio::test]
    async fn test_manifest_staged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), r#"{"family":"staged","stages":["c2-ecs","zone-node"]}"#)
            .unwrap();
        let manifest = TemplateManifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.family, "staged");
        assert_eq!(manifest.stages, vec!["c2-ecs", "zone-node"]);
    }

    #[tokio::test]
    async fn test_copy_template_and_write_vars() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("main.tf"), "# main").unwrap();
        std::fs::create_dir_all(src.path().join("stage1")).unwrap();
        std::fs::write(src.path().join("stage1/main.tf"), "# stage").unwrap();
        std::fs::create_dir_all(src.path().join(".terraform")).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let work = dst.path().join("case-1");
        copy_template(src.path(), &work).await.unwrap();
        assert!(work.join("main.tf").exists());
        assert!(work.join("stage1/main.tf").exists());
        assert!(!work.join(".terraform").exists());

        let vars = BTreeMap::from([("region".to_string(), "hk".to_string())]);
        write_tfvars(&work, &["stage1".to_string()], &vars).await.unwrap();
        let written: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(work.join("stage1").join(TFVARS_FILE)).unwrap()).unwrap();
        assert_eq!(written, vars);
        assert!(work.join(TFVARS_FILE).exists());
    }
}
