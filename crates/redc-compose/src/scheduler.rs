//! Fixed-point dependency scheduling.
//!
//! Deployment runs repeated passes over the undeployed instances in key
//! order and deploys every instance whose dependencies are satisfied. A pass
//! that makes no progress while work remains is a deadlock. Teardown is the
//! mirror image in reverse key order. Nothing is rolled back on failure.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redc_core::DynValue;
use redc_project::Case;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::context::instance_states;
use crate::context::RuntimeService;
use crate::context::ServiceMap;
use crate::error::ComposeError;
use crate::error::Result;
use crate::verified::can_deploy;
use crate::verified::can_destroy;

/// What a successful deploy or rehydration produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployOutcome {
    /// Backing case.
    pub case: Case,
    /// Decoded outputs.
    pub outputs: BTreeMap<String, DynValue>,
}

/// Per-instance lifecycle used by the scheduler.
#[async_trait]
pub trait ServiceDeployer: Send + Sync {
    /// Provision `service`. `all` is the current view of every instance and
    /// is what variable references resolve against.
    async fn deploy(&self, service: &RuntimeService, all: &ServiceMap, cancel: &CancellationToken)
    -> Result<DeployOutcome>;

    /// Tear down a deployed `service`.
    async fn destroy(&self, service: &RuntimeService, cancel: &CancellationToken) -> Result<()>;

    /// Look up the durable record of `service`. `None` means not deployed.
    async fn rehydrate(&self, service: &RuntimeService, cancel: &CancellationToken) -> Result<Option<DeployOutcome>>;
}

fn check_canceled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ComposeError::Canceled);
    }
    Ok(())
}

fn pending_names(services: &ServiceMap, deployed: bool) -> Vec<String> {
    services.values().filter(|s| s.is_deployed == deployed).map(|s| s.name.clone()).collect()
}

/// Deploy every undeployed instance in dependency order.
///
/// Returns the instance names in the order they were deployed. An
/// unresolved variable reference fails only that instance: the rest of the
/// pass still runs, then the first such error is returned.
pub async fn deploy_all(
    services: &mut ServiceMap,
    deployer: &dyn ServiceDeployer,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let keys: Vec<String> = services.keys().cloned().collect();
    let mut pending = services.values().filter(|s| !s.is_deployed).count();
    let mut order = Vec::with_capacity(pending);
    let mut pass = 0u32;

    while pending > 0 {
        pass += 1;
        let mut progressed = 0usize;
        let mut unresolved: Option<ComposeError> = None;

        for key in &keys {
            check_canceled(cancel)?;
            let Some(svc) = services.get(key) else { continue };
            if svc.is_deployed || !can_deploy(&svc.state(), &instance_states(services)) {
                continue;
            }

            info!(service = %svc.name, template = %svc.spec.image, pass, "deploying service");
            let result = deployer.deploy(svc, services, cancel).await;
            match result {
                Ok(outcome) => {
                    if let Some(svc) = services.get_mut(key) {
                        svc.case = Some(outcome.case);
                        svc.outputs = outcome.outputs;
                        svc.is_deployed = true;
                    }
                    progressed += 1;
                    pending -= 1;
                    order.push(key.clone());
                }
                Err(err @ ComposeError::UnresolvedReference { .. }) => {
                    warn!(service = %key, error = %err, "service skipped in this pass");
                    unresolved.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(err) = unresolved {
            return Err(err);
        }
        if progressed == 0 && pending > 0 {
            return Err(ComposeError::Deadlock {
                direction: "deploy",
                pending: pending_names(services, false),
            });
        }
    }

    Ok(order)
}

/// Destroy every deployed instance, dependents first.
///
/// Returns the instance names in the order they were destroyed. A destroy
/// failure ends the run; instances destroyed so far stay destroyed.
pub async fn destroy_all(
    services: &mut ServiceMap,
    deployer: &dyn ServiceDeployer,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let keys: Vec<String> = services.keys().rev().cloned().collect();
    let mut pending = services.values().filter(|s| s.is_deployed).count();
    let mut order = Vec::with_capacity(pending);

    while pending > 0 {
        let mut progressed = 0usize;

        for key in &keys {
            check_canceled(cancel)?;
            let Some(svc) = services.get(key) else { continue };
            if !svc.is_deployed || !can_destroy(&svc.state(), &instance_states(services)) {
                continue;
            }

            info!(service = %svc.name, "destroying service");
            deployer.destroy(svc, cancel).await?;
            if let Some(svc) = services.get_mut(key) {
                svc.is_deployed = false;
                svc.case = None;
            }
            progressed += 1;
            pending -= 1;
            order.push(key.clone());
        }

        if progressed == 0 && pending > 0 {
            return Err(ComposeError::Deadlock {
                direction: "destroy",
                pending: pending_names(services, true),
            });
        }
    }

    Ok(order)
}

/// Mark instances deployed when the store has a record for them, reloading
/// their outputs. Instances without a record are left undeployed.
///
/// Returns how many instances were found.
pub async fn rehydrate_all(
    services: &mut ServiceMap,
    deployer: &dyn ServiceDeployer,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut found = 0;
    for svc in services.values_mut() {
        check_canceled(cancel)?;
        let record = deployer.rehydrate(svc, cancel).await?;
        match record {
            Some(outcome) => {
                svc.case = Some(outcome.case);
                svc.outputs = outcome.outputs;
                svc.is_deployed = true;
                found += 1;
            }
            None => {
                svc.is_deployed = false;
                svc.case = None;
            }
        }
    }
    Ok(found)
}
