//! Layered configuration.
//!
//! Precedence (highest to lowest):
//! - CLI flags (applied by the caller)
//! - `REDC_*` environment variables
//! - TOML file from `--config`, else `~/.redc/config.toml` when present
//! - Hardcoded defaults

use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

/// Default tofu command timeout (30 minutes).
pub const DEFAULT_TOFU_TIMEOUT_SECS: u64 = 30 * 60;

/// Default interval between pricing cache sweeps (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Operator used when none is configured.
pub const DEFAULT_USER: &str = "system";

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`RedcConfig`].
    #[snafu(display("failed to parse config file {}: {source}", path.display()))]
    ParseToml {
        /// File path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// An environment override has an invalid value.
    #[snafu(display("invalid value '{value}' for {key}: {reason}"))]
    InvalidEnv {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Case store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One `project.json` per project.
    #[default]
    Json,
    /// A single redb database.
    Redb,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "redb" => Ok(Self::Redb),
            other => Err(format!("unknown store backend '{other}', expected json or redb")),
        }
    }
}

/// Pricing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// SQLite cache file. Defaults to `<home>/pricing_cache.db`.
    pub cache_path: Option<PathBuf>,
    /// Static fallback table (JSON).
    pub fallback_path: Option<PathBuf>,
    /// HTTP pricing gateway. Without it only cached and fallback prices are used.
    pub endpoint: Option<String>,
    /// Seconds between cache sweeps in `cost sweep --watch`.
    pub sweep_interval_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            fallback_path: None,
            endpoint: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedcConfig {
    /// Root for projects, templates and the pricing cache.
    pub home_dir: PathBuf,
    /// Defaults to `<home>/project`.
    pub projects_dir: Option<PathBuf>,
    /// Defaults to `<home>/redc-templates`.
    pub templates_dir: Option<PathBuf>,
    /// Case store implementation.
    pub store_backend: StoreBackend,
    /// Provisioning binary (`tofu` or `terraform`).
    pub tofu_binary: String,
    /// Per-command timeout for the provisioning binary.
    pub tofu_timeout_secs: u64,
    /// Pricing settings.
    pub pricing: PricingConfig,
    /// Operator recorded on projects and cases.
    pub user: String,
}

fn user_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

impl Default for RedcConfig {
    fn default() -> Self {
        Self {
            home_dir: user_home().join("redc"),
            projects_dir: None,
            templates_dir: None,
            store_backend: StoreBackend::default(),
            tofu_binary: "tofu".to_string(),
            tofu_timeout_secs: DEFAULT_TOFU_TIMEOUT_SECS,
            pricing: PricingConfig::default(),
            user: DEFAULT_USER.to_string(),
        }
    }
}

impl RedcConfig {
    /// Default configuration file location.
    pub fn default_path() -> PathBuf {
        user_home().join(".redc").join("config.toml")
    }

    /// Load defaults, then the TOML file, then environment overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.is_file() {
                    tracing::debug!(path = %default_path.display(), "loading configuration");
                    Self::from_toml_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&contents).context(ParseTomlSnafu { path })
    }

    /// Apply `REDC_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = lookup("REDC_HOME") {
            self.home_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("REDC_PROJECTS_DIR") {
            self.projects_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("REDC_TEMPLATES_DIR") {
            self.templates_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("REDC_STORE_BACKEND") {
            self.store_backend = parse_env("REDC_STORE_BACKEND", &val)?;
        }
        if let Some(val) = lookup("REDC_TOFU_BINARY") {
            self.tofu_binary = val;
        }
        if let Some(val) = lookup("REDC_TOFU_TIMEOUT_SECS") {
            self.tofu_timeout_secs = parse_env("REDC_TOFU_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = lookup("REDC_PRICING_CACHE") {
            self.pricing.cache_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("REDC_PRICING_FALLBACK") {
            self.pricing.fallback_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("REDC_PRICING_ENDPOINT") {
            self.pricing.endpoint = Some(val);
        }
        if let Some(val) = lookup("REDC_PRICING_SWEEP_SECS") {
            self.pricing.sweep_interval_secs = parse_env("REDC_PRICING_SWEEP_SECS", &val)?;
        }
        if let Some(val) = lookup("REDC_USER") {
            self.user = val;
        }
        Ok(())
    }

    /// Directory holding one sub-directory per project.
    pub fn projects_dir(&self) -> PathBuf {
        self.projects_dir.clone().unwrap_or_else(|| self.home_dir.join("project"))
    }

    /// Directory templates are copied from.
    pub fn templates_dir(&self) -> PathBuf {
        self.templates_dir.clone().unwrap_or_else(|| self.home_dir.join("redc-templates"))
    }

    /// Pricing cache database.
    pub fn pricing_cache_path(&self) -> PathBuf {
        self.pricing.cache_path.clone().unwrap_or_else(|| self.home_dir.join("pricing_cache.db"))
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
