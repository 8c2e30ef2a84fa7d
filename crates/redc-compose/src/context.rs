//! Per-run orchestration state.
//!
//! A [`ComposeContext`] is built once per `up`, `down` or `config` call. It
//! expands every active service into its [`RuntimeService`] instances and
//! loads the global configs. Nothing here is persisted; durable identity
//! lives in the case store.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use redc_core::DynValue;
use redc_project::Case;
use snafu::ResultExt;
use tracing::debug;

use crate::error::ComposeError;
use crate::error::ReadConfigFileSnafu;
use crate::error::Result;
use crate::model::ComposeFile;
use crate::model::ConfigSource;
use crate::model::ServiceSpec;
use crate::verified::expand_instances;
use crate::verified::InstanceState;

/// Default compose file name.
pub const DEFAULT_COMPOSE_FILE: &str = "redc-compose.yaml";

/// Caller options for one compose run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Compose file path.
    pub file: PathBuf,
    /// Selected profiles.
    pub profiles: Vec<String>,
    /// Project name.
    pub project: String,
    /// Operating user.
    pub user: String,
}

/// One expanded service instance for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeService {
    /// Instance name, unique within the run.
    pub name: String,
    /// Declared service name it was expanded from.
    pub raw_name: String,
    /// The declared spec.
    pub spec: ServiceSpec,
    /// Provider alias injected into the variables, `None` for the default.
    pub provider_alias: Option<String>,
    /// Whether the instance is currently deployed.
    pub is_deployed: bool,
    /// Backing case, set once provisioning succeeded or the case was found.
    pub case: Option<Case>,
    /// Decoded provisioning outputs.
    pub outputs: BTreeMap<String, DynValue>,
}

impl RuntimeService {
    /// An undeployed instance.
    pub fn new(name: impl Into<String>, raw_name: impl Into<String>, spec: ServiceSpec) -> Self {
        Self {
            name: name.into(),
            raw_name: raw_name.into(),
            spec,
            provider_alias: None,
            is_deployed: false,
            case: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Scheduling view of this instance.
    pub fn state(&self) -> InstanceState<'_> {
        InstanceState {
            name: &self.name,
            raw_name: &self.raw_name,
            depends_on: &self.spec.depends_on,
            deployed: self.is_deployed,
        }
    }
}

/// Instances keyed by name. Iteration order is the stable scheduling order.
pub type ServiceMap = BTreeMap<String, RuntimeService>;

/// Scheduling views of every instance, in key order.
pub fn instance_states(services: &ServiceMap) -> Vec<InstanceState<'_>> {
    services.values().map(RuntimeService::state).collect()
}

/// A setup task with its result slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupTask {
    /// Task name.
    pub name: String,
    /// Raw name of the target service.
    pub service: String,
    /// Command, may hold a placeholder.
    pub command: String,
    /// Trimmed output of the last command run for this task.
    pub outputs: String,
}

/// Everything one compose run works on.
#[derive(Debug, Clone)]
pub struct ComposeContext {
    /// Caller options.
    pub options: ComposeOptions,
    /// Directory containing the compose file.
    pub base_dir: PathBuf,
    /// Parsed compose file.
    pub file: ComposeFile,
    /// Global config contents by key.
    pub configs: BTreeMap<String, String>,
    /// Active instances.
    pub services: ServiceMap,
    /// Setup tasks in declaration order.
    pub setup: Vec<SetupTask>,
}

impl ComposeContext {
    /// Load the compose file named in `options` and build the context.
    pub async fn build(options: ComposeOptions) -> Result<Self> {
        let file = ComposeFile::load(&options.file).await?;
        let base_dir = options.file.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_file(options, file, base_dir).await
    }

    /// Build a context from an already parsed file.
    pub async fn from_file(options: ComposeOptions, file: ComposeFile, base_dir: PathBuf) -> Result<Self> {
        let configs = load_configs(&file.configs, &base_dir).await?;
        let services = expand_services(&file, &options.profiles)?;
        let setup = file
            .setup
            .iter()
            .map(|task| SetupTask {
                name: task.name.clone(),
                service: task.service.clone(),
                command: task.command.clone(),
                outputs: String::new(),
            })
            .collect();

        debug!(
            project = %options.project,
            instances = services.len(),
            configs = configs.len(),
            "compose context built"
        );

        Ok(Self {
            options,
            base_dir,
            file,
            configs,
            services,
            setup,
        })
    }

    /// Resolve a path from the compose file relative to its directory.
    pub fn resolve_local(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Expand every service active under `profiles` into its instances.
///
/// Fails if two services generate the same instance name (`web` with two
/// replicas next to a declared `web-1`).
pub fn expand_services(file: &ComposeFile, profiles: &[String]) -> Result<ServiceMap> {
    let mut services = ServiceMap::new();
    for (raw_name, spec) in &file.services {
        if !spec.is_active(profiles) {
            debug!(service = %raw_name, "service filtered out by profile");
            continue;
        }
        for instance in expand_instances(raw_name, &spec.provider_aliases(), spec.replicas()) {
            let mut runtime = RuntimeService::new(instance.name, raw_name.clone(), spec.clone());
            runtime.provider_alias = instance.provider_alias;
            if let Some(existing) = services.get(&runtime.name) {
                return Err(ComposeError::DuplicateInstance {
                    name: runtime.name,
                    first: existing.raw_name.clone(),
                    second: raw_name.clone(),
                });
            }
            services.insert(runtime.name.clone(), runtime);
        }
    }
    Ok(services)
}

async fn load_configs(sources: &BTreeMap<String, ConfigSource>, base_dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut configs = BTreeMap::new();
    for (key, source) in sources {
        let content = if let Some(value) = &source.value {
            value.clone()
        } else if let Some(file) = &source.file {
            let path = if Path::new(file).is_absolute() {
                PathBuf::from(file)
            } else {
                base_dir.join(file)
            };
            tokio::fs::read_to_string(&path).await.context(ReadConfigFileSnafu { key: key.clone(), path })?
        } else if let Some(var) = &source.env {
            std::env::var(var).map_err(|_| ComposeError::ConfigEnvMissing {
                key: key.clone(),
                var: var.clone(),
            })?
        } else {
            continue;
        };
        configs.insert(key.clone(), content);
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(raw: &str) -> ComposeFile {
        ComposeFile::parse(raw, Path::new("c.yaml")).unwrap()
    }

    #[test]
    fn test_expand_with_profiles_and_replicas() {
        let f = file(
            r#"
services:
  dns: { image: dns/route }
  node: { image: vps/basic, deploy: { replicas: 2 } }
  c2: { image: c2/cs, profiles: [red] }
  proxy: { image: proxy/basic, provider: [hk, sg] }
"#,
        );
        let services = expand_services(&f, &[]).unwrap();
        let names: Vec<&str> = services.keys().map(String::as_str).collect();
        assert_eq!(names, ["dns", "node-1", "node-2", "proxy-hk", "proxy-sg"]);
        assert_eq!(services["node-2"].raw_name, "node");
        assert_eq!(services["proxy-sg"].provider_alias.as_deref(), Some("sg"));

        let with_red = expand_services(&f, &["red".to_string()]).unwrap();
        assert!(with_red.contains_key("c2"));
    }

    #[test]
    fn test_colliding_instance_names_rejected() {
        let f = file(
            r#"
services:
  web: { image: a, deploy: { replicas: 2 } }
  web-1: { image: b }
"#,
        );
        let err = expand_services(&f, &[]).unwrap_err();
        assert!(
            matches!(err, ComposeError::DuplicateInstance { ref name, ref first, ref second }
                if name == "web-1" && first == "web" && second == "web-1"),
            "{err:?}"
        );

        // A profile that filters one side out removes the collision.
        let f = file(
            r#"
services:
  web: { image: a, deploy: { replicas: 2 } }
  web-1: { image: b, profiles: [extra] }
"#,
        );
        assert_eq!(expand_services(&f, &[]).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_configs_from_value_and_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("key.pub"), "ssh-ed25519 AAAA").unwrap();
        let f = file(
            r#"
configs:
  pub: { file: ./key.pub }
  token: { value: abc }
services: {}
"#,
        );
        let options = ComposeOptions {
            file: dir.path().join("c.yaml"),
            profiles: Vec::new(),
            project: "default".into(),
            user: "system".into(),
        };
        let ctx = ComposeContext::from_file(options, f, dir.path().to_path_buf()).await.unwrap();
        assert_eq!(ctx.configs["pub"], "ssh-ed25519 AAAA");
        assert_eq!(ctx.configs["token"], "abc");
    }

    #[tokio::test]
    async fn test_missing_env_config_fails() {
        let f = file("configs:\n  k: { env: REDC_TEST_SURELY_UNSET_VAR }\nservices: {}\n");
        let options = ComposeOptions {
            file: PathBuf::from("c.yaml"),
            profiles: Vec::new(),
            project: "default".into(),
            user: "system".into(),
        };
        let err = ComposeContext::from_file(options, f, PathBuf::new()).await.unwrap_err();
        assert!(matches!(err, ComposeError::ConfigEnvMissing { .. }));
    }
}
