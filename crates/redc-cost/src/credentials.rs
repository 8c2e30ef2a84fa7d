//! Provider credentials for live pricing calls.

use crate::error::PricingError;

/// Access key pair and default region for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key id.
    pub access_key: String,
    /// Secret key.
    pub secret_key: String,
    /// Region used when a lookup does not name one.
    pub default_region: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("default_region", &self.default_region)
            .finish()
    }
}

/// Supplies credentials per provider.
pub trait CredentialProvider: Send + Sync {
    /// Credentials for `provider`, or [`PricingError::MissingCredentials`].
    fn credentials(&self, provider: &str) -> Result<Credentials, PricingError>;
}

impl<F> CredentialProvider for F
where F: Fn(&str) -> Result<Credentials, PricingError> + Send + Sync
{
    fn credentials(&self, provider: &str) -> Result<Credentials, PricingError> {
        self(provider)
    }
}

/// Reads credentials from environment variables.
///
/// | provider     | access key                 | secret key                 | region                    |
/// |--------------|----------------------------|----------------------------|---------------------------|
/// | alicloud     | `ALICLOUD_ACCESS_KEY`      | `ALICLOUD_SECRET_KEY`      | `ALICLOUD_REGION`         |
/// | tencentcloud | `TENCENTCLOUD_SECRET_ID`   | `TENCENTCLOUD_SECRET_KEY`  | `TENCENTCLOUD_REGION`     |
/// | aws          | `AWS_ACCESS_KEY_ID`        | `AWS_SECRET_ACCESS_KEY`    | `AWS_DEFAULT_REGION`      |
/// | volcengine   | `VOLCENGINE_ACCESS_KEY`    | `VOLCENGINE_SECRET_KEY`    | `VOLCENGINE_REGION`       |
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    fn variables(provider: &str) -> Option<(&'static str, &'static str, &'static str)> {
        match provider {
            "alicloud" => Some(("ALICLOUD_ACCESS_KEY", "ALICLOUD_SECRET_KEY", "ALICLOUD_REGION")),
            "tencentcloud" => Some(("TENCENTCLOUD_SECRET_ID", "TENCENTCLOUD_SECRET_KEY", "TENCENTCLOUD_REGION")),
            "aws" => Some(("AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_DEFAULT_REGION")),
            "volcengine" => Some(("VOLCENGINE_ACCESS_KEY", "VOLCENGINE_SECRET_KEY", "VOLCENGINE_REGION")),
            _ => None,
        }
    }

    fn resolve(
        provider: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Credentials, PricingError> {
        let (access_var, secret_var, region_var) = Self::variables(provider).ok_or_else(|| PricingError::MissingCredentials {
            provider: provider.to_string(),
            message: "no credential variables known for this provider".to_string(),
        })?;

        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let access_key = non_empty(access_var);
        let secret_key = non_empty(secret_var);
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Ok(Credentials {
                access_key,
                secret_key,
                default_region: non_empty(region_var).unwrap_or_default(),
            }),
            _ => Err(PricingError::MissingCredentials {
                provider: provider.to_string(),
                message: format!("{access_var} and {secret_var} must be set"),
            }),
        }
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn credentials(&self, provider: &str) -> Result<Credentials, PricingError> {
        Self::resolve(provider, |name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_resolves_aws_from_env() {
        let creds = EnvCredentialProvider::resolve(
            "aws",
            env(&[
                ("AWS_ACCESS_KEY_ID", "AKIA"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_DEFAULT_REGION", "us-east-1"),
            ]),
        )
        .unwrap();
        assert_eq!(creds.access_key, "AKIA");
        assert_eq!(creds.default_region, "us-east-1");
        assert!(!format!("{creds:?}").contains("secret\""));
    }

    #[test]
    fn test_missing_secret_is_error() {
        let err = EnvCredentialProvider::resolve("aws", env(&[("AWS_ACCESS_KEY_ID", "AKIA")])).unwrap_err();
        assert!(matches!(err, PricingError::MissingCredentials { .. }));
        assert!(err.is_non_retryable());
    }

    #[test]
    fn test_unknown_provider() {
        assert!(EnvCredentialProvider::resolve("gcp", env(&[])).is_err());
    }
}
