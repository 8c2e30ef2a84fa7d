//! Template family → [`Provisionable`] registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::ProvisionBackend;
use crate::error::Result;
use crate::error::TofuError;
use crate::provision::Provisionable;
use crate::provision::RetryPolicy;
use crate::provision::StagedProvisioner;
use crate::provision::StandardProvisioner;

/// Registry built once at startup and shared by the lifecycle driver.
#[derive(Clone, Default)]
pub struct ProvisionerRegistry {
    provisioners: HashMap<String, Arc<dyn Provisionable>>,
}

impl std::fmt::Debug for ProvisionerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<&String> = self.provisioners.keys().collect();
        families.sort();
        f.debug_struct("ProvisionerRegistry").field("families", &families).finish()
    }
}

impl ProvisionerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `standard` and `staged` families over `backend`.
    pub fn with_defaults(backend: Arc<dyn ProvisionBackend>, policy: RetryPolicy) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StandardProvisioner::new(backend.clone(), policy)));
        registry.register(Arc::new(StagedProvisioner::new(backend, policy)));
        registry
    }

    /// Register `provisioner` under its own family, replacing any previous entry.
    pub fn register(&mut self, provisioner: Arc<dyn Provisionable>) {
        self.provisioners.insert(provisioner.family().to_string(), provisioner);
    }

    /// Look up the provisioner for `family`.
    pub fn get(&self, family: &str) -> Result<Arc<dyn Provisionable>> {
        self.provisioners.get(family).cloned().ok_or_else(|| TofuError::UnknownFamily {
            family: family.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[test]
    fn test_defaults_registered() {
        let registry = ProvisionerRegistry::with_defaults(Arc::new(MockBackend::new()), RetryPolicy::default());
        assert_eq!(registry.get("standard").unwrap().family(), "standard");
        assert_eq!(registry.get("staged").unwrap().family(), "staged");
        assert!(matches!(registry.get("k8s"), Err(TofuError::UnknownFamily { .. })));
    }
}
