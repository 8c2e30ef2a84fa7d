//! Per-family provisioning lifecycle.
//!
//! A [`Provisionable`] knows how to bring one case up, tear it down, and
//! re-apply it after a change. Recovery policy:
//!
//! - `init` is retried up to [`RetryPolicy::attempts`] times
//! - a failed `apply` is followed by one `destroy` and one more `apply`;
//!   a second failure is fatal
//! - `destroy` is retried up to [`RetryPolicy::attempts`] times
//! - cancellation short-circuits every retry

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::ProvisionBackend;
use crate::backend::TofuOutput;
use crate::error::Result;
use crate::error::TofuError;

/// Attempts and spacing for retried backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// What a provisioner operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionUnit {
    /// Case working directory.
    pub work_dir: PathBuf,
    /// Ordered stage sub-directories; empty for single-directory templates.
    pub stages: Vec<String>,
}

impl ProvisionUnit {
    /// A single-directory unit.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            stages: Vec::new(),
        }
    }

    /// Attach stage directories.
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Directory whose outputs describe the unit: the first (primary) stage,
    /// or the workdir itself.
    pub fn output_dir(&self) -> PathBuf {
        match self.stages.first() {
            Some(first) => self.work_dir.join(first),
            None => self.work_dir.clone(),
        }
    }
}

/// Lifecycle capability of one template family.
#[async_trait]
pub trait Provisionable: Send + Sync {
    /// Family identifier this implementation is registered under.
    fn family(&self) -> &str;

    /// Bring the unit up. Idempotent for already-applied units.
    async fn apply(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()>;

    /// Tear the unit down.
    async fn destroy(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()>;

    /// Re-apply after the unit's variables changed.
    async fn change(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()>;

    /// Backend used for output and state queries.
    fn backend(&self) -> Arc<dyn ProvisionBackend>;
}

async fn pause(delay: Duration, cancel: &CancellationToken, command: &'static str) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(TofuError::Canceled { command }),
    }
}

/// Retry `init` per `policy`.
pub async fn init_with_retry(
    backend: &dyn ProvisionBackend,
    dir: &Path,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<TofuOutput> {
    let mut attempt = 1;
    loop {
        match backend.init(dir, cancel).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) if attempt >= policy.attempts => {
                return Err(TofuError::AttemptsExhausted {
                    command: "init",
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), attempt, error = %e, "init failed, retrying");
                pause(policy.delay, cancel, "init").await?;
                attempt += 1;
            }
        }
    }
}

/// Apply once; on failure destroy and apply a second time.
pub async fn apply_with_recovery(
    backend: &dyn ProvisionBackend,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<TofuOutput> {
    match backend.apply(dir, cancel).await {
        Ok(output) => Ok(output),
        Err(e) if e.is_canceled() => Err(e),
        Err(first) => {
            tracing::warn!(dir = %dir.display(), error = %first, "apply failed, destroying and re-applying");
            if let Err(e) = backend.destroy(dir, cancel).await {
                if e.is_canceled() {
                    return Err(e);
                }
                tracing::warn!(dir = %dir.display(), error = %e, "recovery destroy failed");
            }
            backend.apply(dir, cancel).await.map_err(|second| {
                if second.is_canceled() {
                    second
                } else {
                    TofuError::ApplyFailed {
                        work_dir: dir.to_path_buf(),
                        source: Box::new(second),
                    }
                }
            })
        }
    }
}

/// Retry `destroy` per `policy`.
pub async fn destroy_with_retry(
    backend: &dyn ProvisionBackend,
    dir: &Path,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<TofuOutput> {
    let mut attempt = 1;
    loop {
        match backend.destroy(dir, cancel).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) if attempt >= policy.attempts => {
                return Err(TofuError::AttemptsExhausted {
                    command: "destroy",
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), attempt, error = %e, "destroy failed, retrying");
                pause(policy.delay, cancel, "destroy").await?;
                attempt += 1;
            }
        }
    }
}

/// Single-directory templates.
pub struct StandardProvisioner {
    backend: Arc<dyn ProvisionBackend>,
    policy: RetryPolicy,
}

impl StandardProvisioner {
    /// Family identifier.
    pub const FAMILY: &'static str = crate::template::STANDARD_FAMILY;

    /// Create a provisioner over `backend`.
    pub fn new(backend: Arc<dyn ProvisionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }
}

#[async_trait]
impl Provisionable for StandardProvisioner {
    fn family(&self) -> &str {
        Self::FAMILY
    }

    async fn apply(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()> {
        init_with_retry(self.backend.as_ref(), &unit.work_dir, self.policy, cancel).await?;
        apply_with_recovery(self.backend.as_ref(), &unit.work_dir, cancel).await?;
        tracing::info!(dir = %unit.work_dir.display(), "apply complete");
        Ok(())
    }

    async fn destroy(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()> {
        destroy_with_retry(self.backend.as_ref(), &unit.work_dir, self.policy, cancel).await?;
        tracing::info!(dir = %unit.work_dir.display(), "destroy complete");
        Ok(())
    }

    async fn change(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()> {
        apply_with_recovery(self.backend.as_ref(), &unit.work_dir, cancel).await?;
        Ok(())
    }

    fn backend(&self) -> Arc<dyn ProvisionBackend> {
        self.backend.clone()
    }
}

/// Templates split into ordered stage directories (e.g. a C2 host followed
/// by its redirector nodes). Stages apply in order and destroy in reverse.
pub struct StagedProvisioner {
    backend: Arc<dyn ProvisionBackend>,
    policy: RetryPolicy,
}

impl StagedProvisioner {
    /// Family identifier.
    pub const FAMILY: &'static str = "staged";

    /// Create a provisioner over `backend`.
    pub fn new(backend: Arc<dyn ProvisionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    fn stage_dirs(unit: &ProvisionUnit) -> Vec<PathBuf> {
        if unit.stages.is_empty() {
            return vec![unit.work_dir.clone()];
        }
        unit.stages.iter().map(|stage| unit.work_dir.join(stage)).collect()
    }
}

#[async_trait]
impl Provisionable for StagedProvisioner {
    fn family(&self) -> &str {
        Self::FAMILY
    }

    async fn apply(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()> {
        for dir in Self::stage_dirs(unit) {
            init_with_retry(self.backend.as_ref(), &dir, self.policy, cancel).await?;
            apply_with_recovery(self.backend.as_ref(), &dir, cancel).await?;
            tracing::info!(stage = %dir.display(), "stage applied");
        }
        Ok(())
    }

    async fn destroy(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()> {
        for dir in Self::stage_dirs(unit).into_iter().rev() {
            destroy_with_retry(self.backend.as_ref(), &dir, self.policy, cancel).await?;
            tracing::info!(stage = %dir.display(), "stage destroyed");
        }
        Ok(())
    }

    async fn change(&self, unit: &ProvisionUnit, cancel: &CancellationToken) -> Result<()> {
        // Only the outermost stage is rebuilt; earlier stages keep their state.
        let dirs = Self::stage_dirs(unit);
        if let Some(last) = dirs.last() {
            destroy_with_retry(self.backend.as_ref(), last, self.policy, cancel).await?;
            apply_with_recovery(self.backend.as_ref(), last, cancel).await?;
        }
        Ok(())
    }

    fn backend(&self) -> Arc<dyn ProvisionBackend> {
        self.backend.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_apply_recovers_with_destroy_then_reapply() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("apply", 1);
        let provisioner = StandardProvisioner::new(backend.clone(), quick());

        provisioner.apply(&ProvisionUnit::new("/w"), &CancellationToken::new()).await.unwrap();
        assert_eq!(backend.calls(), vec!["init /w", "apply /w", "destroy /w", "apply /w"]);
    }

    #[tokio::test]
    async fn test_second_apply_failure_is_fatal() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("apply", 2);
        let provisioner = StandardProvisioner::new(backend.clone(), quick());

        let err = provisioner.apply(&ProvisionUnit::new("/w"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TofuError::ApplyFailed { .. }));
    }

    #[tokio::test]
    async fn test_destroy_gives_up_after_three_attempts() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("destroy", 5);
        let provisioner = StandardProvisioner::new(backend.clone(), quick());

        let err = provisioner.destroy(&ProvisionUnit::new("/w"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TofuError::AttemptsExhausted { attempts: 3, .. }));
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_init_retries_then_succeeds() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next("init", 2);
        let provisioner = StandardProvisioner::new(backend.clone(), quick());

        provisioner.apply(&ProvisionUnit::new("/w"), &CancellationToken::new()).await.unwrap();
        assert_eq!(backend.calls(), vec!["init /w", "init /w", "init /w", "apply /w"]);
    }

    #[tokio::test]
    async fn test_canceled_destroy_is_not_retried() {
        let backend = Arc::new(MockBackend::new());
        let provisioner = StandardProvisioner::new(backend.clone(), quick());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provisioner.destroy(&ProvisionUnit::new("/w"), &cancel).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_staged_order() {
        let backend = Arc::new(MockBackend::new());
        let provisioner = StagedProvisioner::new(backend.clone(), quick());
        let unit = ProvisionUnit::new("/w").with_stages(vec!["a".into(), "b".into()]);
        let cancel = CancellationToken::new();

        provisioner.apply(&unit, &cancel).await.unwrap();
        provisioner.destroy(&unit, &cancel).await.unwrap();
        assert_eq!(
            backend.calls(),
            vec!["init /w/a", "apply /w/a", "init /w/b", "apply /w/b", "destroy /w/b", "destroy /w/a"]
        );
    }
}
