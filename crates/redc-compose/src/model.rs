//! Compose file types.
//!
//! These types are deserialized from the YAML compose file and are read-only
//! for the whole run. Runtime state lives in [`crate::context`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

use crate::error::ComposeError;
use crate::error::ParseComposeFileSnafu;
use crate::error::ReadComposeFileSnafu;
use crate::error::Result;

/// A whole compose file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Format version, informational only.
    #[serde(default)]
    pub version: Option<String>,

    /// Global configs keyed by name.
    #[serde(default)]
    pub configs: BTreeMap<String, ConfigSource>,

    /// Declared services keyed by raw name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,

    /// Post-deployment tasks in declaration order.
    #[serde(default)]
    pub setup: Vec<SetupTaskSpec>,
}

/// Where a global config value comes from. Exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSource {
    /// File whose content is the value, relative to the compose file.
    #[serde(default)]
    pub file: Option<String>,

    /// Literal value.
    #[serde(default)]
    pub value: Option<String>,

    /// Environment variable holding the value.
    #[serde(default)]
    pub env: Option<String>,
}

/// `provider:` accepts a single alias or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderField {
    /// One alias.
    One(String),
    /// Several aliases; the service fans out per alias.
    Many(Vec<String>),
}

impl ProviderField {
    /// Aliases in declaration order, empty strings dropped.
    pub fn aliases(&self) -> Vec<String> {
        match self {
            ProviderField::One(alias) if alias.is_empty() => Vec::new(),
            ProviderField::One(alias) => vec![alias.clone()],
            ProviderField::Many(aliases) => aliases.iter().filter(|a| !a.is_empty()).cloned().collect(),
        }
    }
}

impl fmt::Display for ProviderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderField::One(alias) => f.write_str(alias),
            ProviderField::Many(aliases) => write!(f, "[{}]", aliases.join(" ")),
        }
    }
}

/// Replica settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySpec {
    /// Number of instances per provider alias.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

impl Default for DeploySpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
        }
    }
}

/// `environment:` accepts `["K=V", ...]` or a `{K: V}` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// `K=V` strings.
    List(Vec<String>),
    /// Key to scalar value.
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::List(Vec::new())
    }
}

impl Environment {
    /// Assignments as `(key, raw value)` pairs.
    ///
    /// List entries without `=` are ignored. Map scalars are stringified;
    /// `null` becomes the empty string.
    pub fn assignments(&self) -> Vec<(String, String)> {
        match self {
            Environment::List(entries) => entries
                .iter()
                .filter_map(|entry| entry.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
                .collect(),
            Environment::Map(map) => map.iter().map(|(k, v)| (k.clone(), yaml_scalar_to_string(v))).collect(),
        }
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        match self {
            Environment::List(entries) => entries.is_empty(),
            Environment::Map(map) => map.is_empty(),
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// One declared service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Template path under the templates directory.
    pub image: String,

    /// Provider alias or aliases.
    #[serde(default)]
    pub provider: Option<ProviderField>,

    /// Replica settings.
    #[serde(default)]
    pub deploy: Option<DeploySpec>,

    /// Profiles this service belongs to; empty means always active.
    #[serde(default)]
    pub profiles: Vec<String>,

    /// `tfvar=config-key` bindings.
    #[serde(default)]
    pub configs: Vec<String>,

    /// Variable assignments, values may hold `${svc.outputs.key}`.
    #[serde(default)]
    pub environment: Environment,

    /// Raw names that must be deployed first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Command run on the instance after provisioning.
    #[serde(default)]
    pub command: Option<String>,

    /// `local:remote` uploads.
    #[serde(default)]
    pub volumes: Vec<String>,

    /// `remote:local` downloads.
    #[serde(default)]
    pub downloads: Vec<String>,
}

impl ServiceSpec {
    /// Replica count, at least 1.
    pub fn replicas(&self) -> u32 {
        self.deploy.map_or(1, |d| d.replicas.max(1))
    }

    /// Provider aliases in declaration order.
    pub fn provider_aliases(&self) -> Vec<String> {
        self.provider.as_ref().map(ProviderField::aliases).unwrap_or_default()
    }

    /// Whether the service is active under `selected` profiles.
    pub fn is_active(&self, selected: &[String]) -> bool {
        self.profiles.is_empty() || self.profiles.iter().any(|p| selected.contains(p))
    }

    /// Init command, if non-empty.
    pub fn init_command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Whether any remote-session action is declared.
    pub fn has_remote_actions(&self) -> bool {
        self.init_command().is_some() || !self.volumes.is_empty() || !self.downloads.is_empty()
    }

    /// `tfvar=config-key` bindings as pairs; malformed entries are skipped.
    pub fn config_bindings(&self) -> Vec<(&str, &str)> {
        self.configs.iter().filter_map(|entry| entry.split_once('=')).collect()
    }

    /// Upload pairs `(local, remote)`.
    pub fn uploads(&self) -> Vec<(&str, &str)> {
        self.volumes.iter().filter_map(|entry| split_pair(entry)).collect()
    }

    /// Download pairs `(remote, local)`.
    pub fn download_pairs(&self) -> Vec<(&str, &str)> {
        self.downloads.iter().filter_map(|entry| split_pair(entry)).collect()
    }
}

/// Split `a:b` into exactly two parts.
pub fn split_pair(entry: &str) -> Option<(&str, &str)> {
    let mut parts = entry.split(':');
    let first = parts.next()?;
    let second = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((first, second))
}

/// One post-deployment task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTaskSpec {
    /// Task name.
    pub name: String,

    /// Raw name of the target service.
    pub service: String,

    /// Command, may hold `${svc.outputs.key}`.
    pub command: String,
}

impl ComposeFile {
    /// Parse YAML text. `path` is only used for error context.
    pub fn parse(raw: &str, path: &Path) -> Result<Self> {
        let file: ComposeFile = serde_yaml::from_str(raw).context(ParseComposeFileSnafu { path: path.to_path_buf() })?;
        file.validate()?;
        Ok(file)
    }

    /// Read, parse and validate a compose file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.context(ReadComposeFileSnafu { path: path.to_path_buf() })?;
        Self::parse(&raw, path)
    }

    /// Check the semantic rules serde cannot express.
    ///
    /// Unknown `depends_on` names are allowed; they are satisfied vacuously
    /// at scheduling time.
    pub fn validate(&self) -> Result<()> {
        for (key, source) in &self.configs {
            let set = [&source.file, &source.value, &source.env].iter().filter(|f| f.is_some()).count();
            if set != 1 {
                return Err(invalid(format!("config '{key}' must set exactly one of file, value, env")));
            }
        }

        for (name, spec) in &self.services {
            if spec.image.trim().is_empty() {
                return Err(invalid(format!("service '{name}' has no image")));
            }
            for entry in &spec.volumes {
                if split_pair(entry).is_none() {
                    return Err(invalid(format!("service '{name}': volume '{entry}' is not local:remote")));
                }
            }
            for entry in &spec.downloads {
                if split_pair(entry).is_none() {
                    return Err(invalid(format!("service '{name}': download '{entry}' is not remote:local")));
                }
            }
        }

        for (index, task) in self.setup.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(invalid(format!("setup task #{} has no name", index + 1)));
            }
            if task.command.trim().is_empty() {
                return Err(invalid(format!("setup task '{}' has an empty command", task.name)));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> ComposeError {
    ComposeError::InvalidCompose { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "1"
configs:
  ssh_key: { file: ./id_rsa.pub }
  token: { value: abc }
services:
  dns:
    image: dns/route
  teamserver:
    image: c2/cs-49
    provider: [default, hk]
    deploy: { replicas: 2 }
    profiles: [c2]
    configs: ["ssh_pub=ssh_key"]
    environment: ["domain=${dns.outputs.domain}"]
    depends_on: [dns]
    command: "bash /root/init.sh"
    volumes: ["./init.sh:/root/init.sh"]
    downloads: ["/root/.cs/key:./out/key"]
setup:
  - name: register
    service: teamserver
    command: "echo ${teamserver.outputs.ip}"
"#;

    fn parse(raw: &str) -> Result<ComposeFile> {
        ComposeFile::parse(raw, Path::new("redc-compose.yaml"))
    }

    #[test]
    fn test_parse_sample() {
        let file = parse(SAMPLE).unwrap();
        assert_eq!(file.services.len(), 2);
        let ts = &file.services["teamserver"];
        assert_eq!(ts.provider_aliases(), vec!["default", "hk"]);
        assert_eq!(ts.replicas(), 2);
        assert_eq!(ts.config_bindings(), vec![("ssh_pub", "ssh_key")]);
        assert_eq!(ts.uploads(), vec![("./init.sh", "/root/init.sh")]);
        assert_eq!(ts.download_pairs(), vec![("/root/.cs/key", "./out/key")]);
        assert_eq!(ts.environment.assignments(), vec![("domain".to_string(), "${dns.outputs.domain}".to_string())]);
        assert_eq!(file.setup[0].service, "teamserver");
    }

    #[test]
    fn test_environment_map_form() {
        let file = parse(
            r#"
services:
  web:
    image: web/basic
    environment:
      PORT: 8080
      DEBUG: true
      EMPTY: ~
      HOST: "${db.outputs.ip}"
"#,
        )
        .unwrap();
        let env = file.services["web"].environment.assignments();
        assert!(env.contains(&("PORT".to_string(), "8080".to_string())));
        assert!(env.contains(&("DEBUG".to_string(), "true".to_string())));
        assert!(env.contains(&("EMPTY".to_string(), String::new())));
        assert!(env.contains(&("HOST".to_string(), "${db.outputs.ip}".to_string())));
    }

    #[test]
    fn test_profiles() {
        let mut spec = ServiceSpec::default();
        assert!(spec.is_active(&[]));
        spec.profiles = vec!["c2".into()];
        assert!(!spec.is_active(&[]));
        assert!(spec.is_active(&["c2".to_string()]));
    }

    #[test]
    fn test_empty_setup_command_rejected() {
        let err = parse(
            r#"
services:
  web: { image: web/basic }
setup:
  - { name: t, service: web, command: "  " }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::InvalidCompose { .. }));
    }

    #[test]
    fn test_bad_volume_rejected() {
        let err = parse(
            r#"
services:
  web: { image: web/basic, volumes: ["a:b:c"] }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("a:b:c"));
    }

    #[test]
    fn test_config_source_needs_exactly_one() {
        let err = parse(
            r#"
configs:
  both: { value: x, env: Y }
services: {}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_unknown_depends_on_allowed() {
        parse("services:\n  web: { image: web/basic, depends_on: [ghost] }\n").unwrap();
    }

    #[test]
    fn test_single_string_provider() {
        let field: ProviderField = serde_yaml::from_str("hk").unwrap();
        assert_eq!(field.aliases(), vec!["hk"]);
        assert_eq!(field.to_string(), "hk");
    }
}
