//! Configuration parsing and structures
//!
//! Settings come from three layers, later layers winning: an optional YAML
//! file (with `${VAR}` substitution), `E2E_*` environment variables, and
//! command line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::substitute_env_vars;

/// Canonical S3 region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum length of an S3 bucket name
pub const MAX_BUCKET_NAME_LEN: usize = 63;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Object store endpoint and default credentials
    #[serde(default)]
    pub s3: RawS3Config,

    /// Cluster-side settings
    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    /// What to do with test resources once a test finishes
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Throughput benchmark settings
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Size of the payload used by large-file scenarios
    pub large_file_size_mib: Option<u64>,
}

/// S3 section; every field may be filled in later by overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawS3Config {
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    pub bucket_prefix: Option<String>,
    pub force_path_style: Option<bool>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub s3: S3Config,
    pub kubernetes: KubernetesConfig,
    pub cleanup: CleanupConfig,
    pub performance: PerformanceConfig,
    pub large_file_size_mib: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// S3 endpoint configuration (fully resolved)
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL of the S3-compatible store
    pub endpoint_url: String,

    /// Access key of the account that owns test buckets
    pub access_key_id: String,

    /// Secret key of the account that owns test buckets
    pub secret_access_key: String,

    pub region: String,

    /// Prefix for every bucket the suite creates
    pub bucket_prefix: String,

    /// Force path-style addressing (needed by most S3-compatible stores)
    pub force_path_style: bool,
}

/// Kubernetes-side configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Prefix for per-test namespaces
    pub namespace_prefix: String,

    /// CSI driver name referenced by persistent volumes
    pub driver_name: String,

    /// Namespace the driver's node plugin runs in
    pub driver_namespace: String,

    /// Name of the driver's node DaemonSet
    pub driver_daemonset: String,

    /// Image for the default test pod
    pub test_image: String,

    #[serde(with = "humantime_serde")]
    pub pod_start_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub claim_bound_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub delete_timeout: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "s3-csi-e2e-".to_string(),
            driver_name: "s3.csi.aws.com".to_string(),
            driver_namespace: "kube-system".to_string(),
            driver_daemonset: "s3-csi-node".to_string(),
            test_image: "registry.k8s.io/e2e-test-images/busybox:1.36.1-1".to_string(),
            pod_start_timeout: Duration::from_secs(300),
            claim_bound_timeout: Duration::from_secs(120),
            delete_timeout: Duration::from_secs(120),
        }
    }
}

/// When test resources are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Always remove resources
    #[default]
    Always,
    /// Keep resources of failed tests for inspection
    OnSuccess,
    /// Never remove resources
    Never,
}

impl CleanupPolicy {
    /// Whether resources should be removed for a test with the given outcome
    pub fn should_cleanup(self, succeeded: bool) -> bool {
        match self {
            CleanupPolicy::Always => true,
            CleanupPolicy::OnSuccess => succeeded,
            CleanupPolicy::Never => false,
        }
    }
}

impl std::str::FromStr for CleanupPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(CleanupPolicy::Always),
            "on-success" | "on_success" => Ok(CleanupPolicy::OnSuccess),
            "never" => Ok(CleanupPolicy::Never),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown cleanup policy: {other} (expected always, on-success or never)"
            ))),
        }
    }
}

/// Cleanup configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub policy: CleanupPolicy,
}

/// Performance benchmark configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Run the benchmark suite
    pub enabled: bool,

    /// Directory holding `*.fio` job files
    pub fio_config_dir: PathBuf,

    /// Where benchmark entries are written
    pub output_path: PathBuf,

    /// Image that benchmark pods run (fio is installed with apt)
    pub image: String,

    /// Number of benchmark pods sharing one volume
    pub pods: usize,

    /// Maximum concurrent tasks when fanning out across pods
    pub parallelism: usize,

    /// Minimum acceptable throughput in MiB/s, keyed by benchmark name
    pub min_throughput_mib_s: BTreeMap<String, f64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fio_config_dir: PathBuf::from("fio"),
            output_path: PathBuf::from("test-results/output.json"),
            image: "public.ecr.aws/docker/library/ubuntu:22.04".to_string(),
            pods: 3,
            parallelism: 3,
            min_throughput_mib_s: BTreeMap::new(),
        }
    }
}

const DEFAULT_LARGE_FILE_SIZE_MIB: u64 = 100;

// =============================================================================
// Overrides (environment and command line)
// =============================================================================

/// Values that take precedence over the YAML file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket_prefix: Option<String>,
    pub cleanup_policy: Option<CleanupPolicy>,
    pub large_file_size_mib: Option<u64>,
    pub performance: Option<bool>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Read overrides from `E2E_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let cleanup_policy = get("E2E_CLEANUP_POLICY")
            .map(|v| v.parse::<CleanupPolicy>())
            .transpose()?;

        let large_file_size_mib = get("E2E_LARGE_FILE_SIZE_MIB")
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "E2E_LARGE_FILE_SIZE_MIB must be an integer, got {v:?}"
                    ))
                })
            })
            .transpose()?;

        let performance = get("E2E_PERFORMANCE").map(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        Ok(Self {
            endpoint_url: get("E2E_S3_ENDPOINT_URL"),
            access_key_id: get("E2E_ACCESS_KEY_ID"),
            secret_access_key: get("E2E_SECRET_ACCESS_KEY"),
            bucket_prefix: get("E2E_BUCKET_PREFIX"),
            cleanup_policy,
            large_file_size_mib,
            performance,
            log_level: get("E2E_LOG_LEVEL"),
        })
    }

    /// Layer `other` on top of `self`; values set in `other` win
    pub fn merge(self, other: ConfigOverrides) -> Self {
        Self {
            endpoint_url: other.endpoint_url.or(self.endpoint_url),
            access_key_id: other.access_key_id.or(self.access_key_id),
            secret_access_key: other.secret_access_key.or(self.secret_access_key),
            bucket_prefix: other.bucket_prefix.or(self.bucket_prefix),
            cleanup_policy: other.cleanup_policy.or(self.cleanup_policy),
            large_file_size_mib: other.large_file_size_mib.or(self.large_file_size_mib),
            performance: other.performance.or(self.performance),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn apply(self, raw: &mut RawConfig) {
        if let Some(v) = self.endpoint_url {
            raw.s3.endpoint_url = Some(v);
        }
        if let Some(v) = self.access_key_id {
            raw.s3.access_key_id = Some(v);
        }
        if let Some(v) = self.secret_access_key {
            raw.s3.secret_access_key = Some(v);
        }
        if let Some(v) = self.bucket_prefix {
            raw.s3.bucket_prefix = Some(v);
        }
        if let Some(v) = self.cleanup_policy {
            raw.cleanup.policy = v;
        }
        if let Some(v) = self.large_file_size_mib {
            raw.large_file_size_mib = Some(v);
        }
        if let Some(v) = self.performance {
            raw.performance.enabled = v;
        }
        if let Some(v) = self.log_level {
            raw.logging.level = v;
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, filling defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            s3,
            kubernetes,
            cleanup,
            performance,
            large_file_size_mib,
        } = self;

        let endpoint_url = s3.endpoint_url.ok_or_else(|| {
            ConfigError::ValidationError(
                "No S3 endpoint configured (set s3.endpoint_url or E2E_S3_ENDPOINT_URL)"
                    .to_string(),
            )
        })?;
        let access_key_id = s3.access_key_id.ok_or_else(|| {
            ConfigError::ValidationError(
                "No access key configured (set s3.access_key_id or E2E_ACCESS_KEY_ID)"
                    .to_string(),
            )
        })?;
        let secret_access_key = s3.secret_access_key.ok_or_else(|| {
            ConfigError::ValidationError(
                "No secret key configured (set s3.secret_access_key or E2E_SECRET_ACCESS_KEY)"
                    .to_string(),
            )
        })?;

        Ok(Config {
            logging,
            s3: S3Config {
                endpoint_url,
                access_key_id,
                secret_access_key,
                region: s3.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
                bucket_prefix: s3
                    .bucket_prefix
                    .unwrap_or_else(|| "s3-csi-k8s-e2e-".to_string()),
                force_path_style: s3.force_path_style.unwrap_or(true),
            },
            kubernetes,
            cleanup,
            performance,
            large_file_size_mib: large_file_size_mib.unwrap_or(DEFAULT_LARGE_FILE_SIZE_MIB),
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::raw_from_file(path)?.resolve()
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        parse_raw(content)?.resolve()
    }

    /// Load the optional file, apply overrides, resolve and validate
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut raw = match path {
            Some(path) => Self::raw_from_file(path)?,
            None => RawConfig::default(),
        };
        overrides.apply(&mut raw);

        let config = raw.resolve()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `E2E_CONFIG` (if set) and `E2E_*` overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os("E2E_CONFIG").map(PathBuf::from);
        Self::load(path.as_deref(), ConfigOverrides::from_env()?)
    }

    fn raw_from_file(path: &Path) -> Result<RawConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
        parse_raw(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.endpoint_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "S3 endpoint URL cannot be empty".to_string(),
            ));
        }
        if !self.s3.endpoint_url.starts_with("http://")
            && !self.s3.endpoint_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(format!(
                "S3 endpoint URL must start with http:// or https://, got {:?}",
                self.s3.endpoint_url
            )));
        }
        if self.s3.access_key_id.is_empty() || self.s3.secret_access_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "S3 access key and secret key cannot be empty".to_string(),
            ));
        }

        // Leave room for the random suffix appended to each bucket name
        let prefix = &self.s3.bucket_prefix;
        if prefix.len() > MAX_BUCKET_NAME_LEN - 8 {
            return Err(ConfigError::ValidationError(format!(
                "Bucket prefix {prefix:?} is too long"
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(ConfigError::ValidationError(format!(
                "Bucket prefix {prefix:?} may only contain lowercase letters, digits, '-' and '.'"
            )));
        }

        if self.kubernetes.driver_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "CSI driver name cannot be empty".to_string(),
            ));
        }
        if self.large_file_size_mib == 0 {
            return Err(ConfigError::ValidationError(
                "large_file_size_mib must be greater than zero".to_string(),
            ));
        }
        if self.performance.pods == 0 || self.performance.parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "performance.pods and performance.parallelism must be greater than zero"
                    .to_string(),
            ));
        }
        for (name, threshold) in &self.performance.min_throughput_mib_s {
            if !threshold.is_finite() || *threshold < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Throughput threshold for {name} must be a non-negative number"
                )));
            }
        }

        Ok(())
    }

    /// Large-file payload size in bytes
    pub fn large_file_size_bytes(&self) -> usize {
        (self.large_file_size_mib as usize) * 1024 * 1024
    }
}

fn parse_raw(content: &str) -> Result<RawConfig, ConfigError> {
    let content = substitute_env_vars(content)?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
