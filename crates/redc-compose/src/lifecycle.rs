//! Per-service provisioning lifecycle.
//!
//! [`LifecycleDriver`] is the production [`ServiceDeployer`]. For one
//! instance it merges variables, finds or creates the backing case, applies
//! the template through the family's provisioner, decodes the outputs, and
//! then runs the best-effort remote actions (uploads, init command,
//! downloads).

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redc_core::time::now_timestamp;
use redc_core::DynValue;
use redc_project::Case;
use redc_project::CaseState;
use redc_project::CaseStore;
use redc_tofu::template::copy_template;
use redc_tofu::template::write_tfvars;
use redc_tofu::ProvisionUnit;
use redc_tofu::ProvisionerRegistry;
use redc_tofu::TemplateManifest;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::context::ComposeContext;
use crate::context::RuntimeService;
use crate::context::ServiceMap;
use crate::error::log_best_effort;
use crate::error::ComposeError;
use crate::error::ProjectSnafu;
use crate::error::ProvisionSnafu;
use crate::error::Result;
use crate::log_writer::join_log_writer;
use crate::log_writer::log_path;
use crate::log_writer::spawn_log_writer;
use crate::resolver::resolve;
use crate::scheduler::DeployOutcome;
use crate::scheduler::ServiceDeployer;
use crate::session::SessionConfig;
use crate::session::SessionConnector;

/// Variable carrying a non-default provider alias.
pub const PROVIDER_ALIAS_VAR: &str = "provider_alias";

/// Collaborators shared by every compose operation.
#[derive(Clone)]
pub struct ComposeEnv {
    /// Project and case persistence.
    pub store: Arc<dyn CaseStore>,
    /// Template family to provisioner.
    pub registry: Arc<ProvisionerRegistry>,
    /// Remote session factory.
    pub connector: Arc<dyn SessionConnector>,
    /// Root of the local template tree.
    pub templates_dir: PathBuf,
    /// Mirror remote command output to stdout.
    pub mirror_stdout: bool,
}

impl std::fmt::Debug for ComposeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeEnv")
            .field("registry", &self.registry)
            .field("templates_dir", &self.templates_dir)
            .field("mirror_stdout", &self.mirror_stdout)
            .finish_non_exhaustive()
    }
}

/// Merge the provisioning variables of `svc`.
///
/// Config bindings whose key is not loaded are logged and skipped.
/// Environment values go through the resolver; fan-out results are joined
/// with `,`. A non-default provider alias is added under
/// [`PROVIDER_ALIAS_VAR`].
pub fn build_variables(
    svc: &RuntimeService,
    all: &ServiceMap,
    configs: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();

    for (var, key) in svc.spec.config_bindings() {
        match configs.get(key) {
            Some(content) => {
                vars.insert(var.to_string(), content.clone());
            }
            None => error!(service = %svc.name, config = key, "config key not found; variable skipped"),
        }
    }

    for (key, raw) in svc.spec.environment.assignments() {
        let values = resolve(&raw, all, Some(svc)).map_err(|reason| ComposeError::UnresolvedReference {
            service: svc.name.clone(),
            expression: raw.clone(),
            reason,
        })?;
        vars.insert(key, values.join(","));
    }

    if let Some(alias) = &svc.provider_alias {
        vars.insert(PROVIDER_ALIAS_VAR.to_string(), alias.clone());
    }

    Ok(vars)
}

/// Check that every instance's template exists under `templates_dir`.
pub async fn verify_templates(services: &ServiceMap, templates_dir: &Path) -> Result<()> {
    for svc in services.values() {
        let path = templates_dir.join(&svc.spec.image);
        let is_dir = tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(ComposeError::TemplateNotFound {
                service: svc.name.clone(),
                template: svc.spec.image.clone(),
                path,
            });
        }
    }
    Ok(())
}

/// Decode raw `output -json` values; text that is not JSON stays a string.
pub fn decode_outputs(raw: BTreeMap<String, String>) -> BTreeMap<String, DynValue> {
    raw.into_iter().map(|(k, v)| (k, DynValue::decode(&v))).collect()
}

/// Provisions instances of one compose run.
pub struct LifecycleDriver {
    env: ComposeEnv,
    project: String,
    user: String,
    configs: BTreeMap<String, String>,
    base_dir: PathBuf,
}

impl LifecycleDriver {
    /// Driver for the project and configs of `ctx`.
    pub fn new(env: ComposeEnv, ctx: &ComposeContext) -> Self {
        Self {
            env,
            project: ctx.options.project.clone(),
            user: ctx.options.user.clone(),
            configs: ctx.configs.clone(),
            base_dir: ctx.base_dir.clone(),
        }
    }

    fn project_dir(&self) -> PathBuf {
        self.env.store.project_dir(&self.project)
    }

    fn resolve_local(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    async fn find_case(&self, name: &str) -> Result<Option<Case>> {
        self.env.store.find_case_by_name(&self.project, name).await.context(ProjectSnafu)
    }

    async fn create_case(&self, svc: &RuntimeService, vars: &BTreeMap<String, String>) -> Result<Case> {
        let mut case = Case::new(&svc.name, &svc.spec.image, &self.user, PathBuf::new());
        case.path = self.project_dir().join(&case.id);
        case.parameters = vars.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let template_dir = self.env.templates_dir.join(&svc.spec.image);
        copy_template(&template_dir, &case.path).await.context(ProvisionSnafu { service: svc.name.clone() })?;
        self.env.store.add_case(&self.project, case.clone()).await.context(ProjectSnafu)?;
        info!(service = %svc.name, case_id = %case.id, template = %svc.spec.image, "case created");
        Ok(case)
    }

    async fn set_state(&self, case: &Case, state: CaseState) -> Result<()> {
        self.env
            .store
            .update_case_state(&self.project, &case.id, state, &now_timestamp())
            .await
            .context(ProjectSnafu)
    }

    async fn unit_for(&self, service: &str, case: &Case) -> Result<(TemplateManifest, ProvisionUnit)> {
        let manifest = TemplateManifest::load(&case.path).await.context(ProvisionSnafu { service })?;
        let unit = ProvisionUnit::new(&case.path).with_stages(manifest.stages.clone());
        Ok((manifest, unit))
    }

    async fn read_outputs(
        &self,
        service: &str,
        family: &str,
        unit: &ProvisionUnit,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, DynValue>> {
        let provisioner = self.env.registry.get(family).context(ProvisionSnafu { service })?;
        match provisioner.backend().output(&unit.output_dir(), cancel).await {
            Ok(raw) => Ok(decode_outputs(raw)),
            Err(e) if e.is_canceled() => Err(ComposeError::Canceled),
            Err(e) => {
                warn!(service, error = %e, "reading outputs failed; continuing without outputs");
                Ok(BTreeMap::new())
            }
        }
    }

    /// Uploads, init command and downloads. Failures are logged only.
    async fn run_remote_actions(
        &self,
        svc: &RuntimeService,
        outputs: &BTreeMap<String, DynValue>,
        cancel: &CancellationToken,
    ) {
        if !svc.spec.has_remote_actions() {
            return;
        }
        let config = match SessionConfig::from_outputs(&svc.name, outputs) {
            Ok(config) => config,
            Err(e) => {
                debug!(service = %svc.name, reason = %e, "skipping remote actions");
                return;
            }
        };
        let Some(session) = log_best_effort("connect", &svc.name, self.env.connector.connect(&config, cancel).await)
        else {
            return;
        };

        for (local, remote) in svc.spec.uploads() {
            let local = self.resolve_local(local);
            info!(service = %svc.name, local = %local.display(), remote, "uploading");
            log_best_effort("upload", &svc.name, session.upload(&local, remote, cancel).await);
        }

        if let Some(command) = svc.spec.init_command() {
            info!(service = %svc.name, "running init command");
            let (tx, writer) = spawn_log_writer(log_path(&self.project_dir(), &svc.name), self.env.mirror_stdout);
            let result = session.run_command(command, tx, cancel).await;
            log_best_effort("log writer", &svc.name, join_log_writer(writer).await);
            log_best_effort("init command", &svc.name, result);
        }

        for (remote, local) in svc.spec.download_pairs() {
            let local = self.resolve_local(local);
            info!(service = %svc.name, remote, local = %local.display(), "downloading");
            if let Some(parent) = local.parent() {
                let created = tokio::fs::create_dir_all(parent).await.map_err(|source| ComposeError::LocalIo {
                    action: "create download directory",
                    path: parent.to_path_buf(),
                    source,
                });
                log_best_effort("download", &svc.name, created);
            }
            log_best_effort("download", &svc.name, session.download(remote, &local, cancel).await);
        }

        log_best_effort("close", &svc.name, session.close().await);
    }
}

#[async_trait]
impl ServiceDeployer for LifecycleDriver {
    async fn deploy(
        &self,
        svc: &RuntimeService,
        all: &ServiceMap,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome> {
        let vars = build_variables(svc, all, &self.configs)?;

        let mut case = match self.find_case(&svc.name).await? {
            Some(existing) => {
                debug!(service = %svc.name, case_id = %existing.id, "reusing existing case");
                existing
            }
            None => self.create_case(svc, &vars).await?,
        };

        let (manifest, unit) = self.unit_for(&svc.name, &case).await?;
        write_tfvars(&case.path, &manifest.stages, &vars).await.context(ProvisionSnafu { service: svc.name.clone() })?;

        let provisioner = self.env.registry.get(&manifest.family).context(ProvisionSnafu { service: svc.name.clone() })?;
        if let Err(source) = provisioner.apply(&unit, cancel).await {
            if !source.is_canceled() {
                log_best_effort("record error state", &svc.name, self.set_state(&case, CaseState::Error).await);
            }
            return Err(ComposeError::Provision {
                service: svc.name.clone(),
                source,
            });
        }
        self.set_state(&case, CaseState::Running).await?;
        case.state = CaseState::Running;

        let outputs = self.read_outputs(&svc.name, &manifest.family, &unit, cancel).await?;
        info!(service = %svc.name, case_id = %case.id, outputs = outputs.len(), "service deployed");

        self.run_remote_actions(svc, &outputs, cancel).await;

        Ok(DeployOutcome { case, outputs })
    }

    async fn destroy(&self, svc: &RuntimeService, cancel: &CancellationToken) -> Result<()> {
        let case = match &svc.case {
            Some(case) => case.clone(),
            None => match self.find_case(&svc.name).await? {
                Some(case) => case,
                None => {
                    debug!(service = %svc.name, "no case recorded; nothing to destroy");
                    return Ok(());
                }
            },
        };

        let (manifest, unit) = self.unit_for(&svc.name, &case).await?;
        let provisioner = self.env.registry.get(&manifest.family).context(ProvisionSnafu { service: svc.name.clone() })?;
        if let Err(source) = provisioner.destroy(&unit, cancel).await {
            if !source.is_canceled() {
                log_best_effort("record error state", &svc.name, self.set_state(&case, CaseState::Error).await);
            }
            return Err(ComposeError::Provision {
                service: svc.name.clone(),
                source,
            });
        }

        self.env.store.delete_case(&self.project, &case.id).await.context(ProjectSnafu)?;
        let removed = tokio::fs::remove_dir_all(&case.path).await.map_err(|source| ComposeError::LocalIo {
            action: "remove case directory",
            path: case.path.clone(),
            source,
        });
        log_best_effort("cleanup", &svc.name, removed);
        info!(service = %svc.name, case_id = %case.id, "service destroyed");
        Ok(())
    }

    async fn rehydrate(&self, svc: &RuntimeService, cancel: &CancellationToken) -> Result<Option<DeployOutcome>> {
        let Some(case) = self.find_case(&svc.name).await? else {
            return Ok(None);
        };
        let (manifest, unit) = self.unit_for(&svc.name, &case).await?;
        let outputs = self.read_outputs(&svc.name, &manifest.family, &unit, cancel).await?;
        debug!(service = %svc.name, case_id = %case.id, "rehydrated from store");
        Ok(Some(DeployOutcome { case, outputs }))
    }
}
