//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Shared configuration and logging for the DR worker."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use indexmap::IndexMap;
use kits_model::BasicAuth;
use kits_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_descriptor() -> String {
    "kits.yaml".to_owned()
}

fn default_suffixes() -> Vec<String> {
    vec!["-solace-a.local".to_owned(), "-solace-b.local".to_owned()]
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_resolve_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_fleet_policy() -> RetryPolicy {
    RetryPolicy::exponential(
        5,
        Duration::from_secs(5),
        2.0,
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

fn default_api_check_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        ..default_fleet_policy()
    }
}

fn default_demote_policy() -> RetryPolicy {
    RetryPolicy::flat(3, Duration::from_secs(1), Duration::from_secs(30))
}

fn default_drain_policy() -> RetryPolicy {
    RetryPolicy::flat(12, Duration::from_secs(5), Duration::from_secs(70))
}

fn default_step_policy() -> RetryPolicy {
    RetryPolicy::standard(3, Duration::from_secs(30))
}

/// Primary configuration object for the DR worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    /// Policy for VPN discovery queries issued by the kit controller.
    #[serde(default = "default_fleet_policy")]
    pub discovery: RetryPolicy,
    /// Policy for each about-endpoint call of the API check.
    #[serde(default = "default_api_check_policy")]
    pub api_check: RetryPolicy,
    #[serde(default)]
    pub failover: FailoverPolicies,
    #[serde(default)]
    pub fleet: FleetConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "KITS_DR_CONFIG";
    pub const DEFAULT_PATH: &'static str = "configs/kits-dr.toml";

    /// Load configuration from an explicit path, the `KITS_DR_CONFIG` override,
    /// or the first existing candidate, in that order.
    ///
    /// An explicit or environment path must exist. When neither is given and
    /// no candidate exists the built-in defaults are returned.
    pub fn load_with_source<P: AsRef<Path>>(
        explicit: Option<&Path>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        if let Some(path) = explicit {
            let config = Self::from_path(path)?;
            return Ok(LoadedAppConfig {
                config,
                source: Some(path.to_path_buf()),
            });
        }

        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.dns.validate()?;
        self.topology.retry.validate("topology")?;
        self.discovery.validate("discovery")?;
        self.api_check.validate("api_check")?;
        self.failover.validate()?;
        ensure!(
            !self.broker.probe_timeout.is_zero(),
            "broker probe_timeout must be non-zero"
        );
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            broker: BrokerConfig::default(),
            topology: TopologyConfig::default(),
            dns: DnsConfig::default(),
            discovery: default_fleet_policy(),
            api_check: default_api_check_policy(),
            failover: FailoverPolicies::default(),
            fleet: FleetConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Write a daily rolling JSON file next to the stdout stream.
    #[serde(default = "default_true")]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// URL scheme used to reach broker management endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerScheme {
    #[default]
    Http,
    Https,
}

impl BrokerScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerScheme::Http => "http",
            BrokerScheme::Https => "https",
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub scheme: BrokerScheme,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Fixed bound on one redundancy-status probe.
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub probe_timeout: Duration,
    /// Transport bound on every other management request.
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            scheme: BrokerScheme::default(),
            username: String::new(),
            password: String::new(),
            probe_timeout: default_probe_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl BrokerConfig {
    pub const ENV_USERNAME: &'static str = "KITS_DR_BROKER_USERNAME";
    pub const ENV_PASSWORD: &'static str = "KITS_DR_BROKER_PASSWORD";

    /// Credential from config, overridden by the process environment.
    pub fn credentials(&self) -> BasicAuth {
        self.credentials_from(|key| std::env::var(key).ok())
    }

    /// Credential from config, overridden by `lookup` for the two env keys.
    pub fn credentials_from<F>(&self, lookup: F) -> BasicAuth
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup(Self::ENV_USERNAME)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.username.clone());
        let password = lookup(Self::ENV_PASSWORD)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.password.clone());
        BasicAuth::new(username, password)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Remote archive location; takes precedence over `path`.
    #[serde(default)]
    pub url: Option<String>,
    /// Local `.tar.gz` archive or plain YAML descriptor.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Suffix identifying the descriptor entry inside the archive.
    #[serde(default = "default_descriptor")]
    pub descriptor: String,
    /// Substring filter on kit names.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_fleet_policy")]
    pub retry: RetryPolicy,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            url: None,
            path: None,
            descriptor: default_descriptor(),
            filter: None,
            retry: default_fleet_policy(),
        }
    }
}

/// How a detector maintains per-name DNS baselines between polls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BaselinePolicy {
    /// A changed name keeps its pre-change baseline until it reverts or the
    /// trigger fires.
    #[default]
    Latched,
    /// Every baseline follows the latest resolution each poll.
    Rolling,
}

impl std::str::FromStr for BaselinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "latched" => Ok(BaselinePolicy::Latched),
            "rolling" => Ok(BaselinePolicy::Rolling),
            other => Err(format!("unknown baseline policy: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Appended to the VPN name to form each watched name. The first entry is
    /// the primary name.
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,
    /// Changed names needed to fire. Defaults to every watched name.
    #[serde(default)]
    pub required_changes: Option<usize>,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_resolve_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub resolve_timeout: Duration,
    #[serde(default)]
    pub baseline_policy: BaselinePolicy,
    /// Hosts-format file consulted before live resolution.
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,
    /// Static name to address table consulted before the hosts file.
    #[serde(default)]
    pub overrides: IndexMap<String, IpAddr>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            suffixes: default_suffixes(),
            required_changes: None,
            poll_interval: default_poll_interval(),
            resolve_timeout: default_resolve_timeout(),
            baseline_policy: BaselinePolicy::default(),
            hosts_file: None,
            overrides: IndexMap::new(),
        }
    }
}

impl DnsConfig {
    /// Effective number of changed names required to fire.
    pub fn required_changes(&self) -> usize {
        self.required_changes.unwrap_or(self.suffixes.len())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.suffixes.is_empty(), "dns.suffixes must not be empty");
        let mut seen = HashSet::new();
        for suffix in &self.suffixes {
            ensure!(!suffix.is_empty(), "dns.suffixes entries must not be empty");
            if !seen.insert(suffix.to_lowercase()) {
                return Err(anyhow!("dns.suffixes contains duplicate entry '{}'", suffix));
            }
        }
        let required = self.required_changes();
        ensure!(
            (1..=self.suffixes.len()).contains(&required),
            "dns.required_changes must be between 1 and {} (got {})",
            self.suffixes.len(),
            required
        );
        ensure!(
            !self.poll_interval.is_zero(),
            "dns.poll_interval must be non-zero"
        );
        ensure!(
            !self.resolve_timeout.is_zero(),
            "dns.resolve_timeout must be non-zero"
        );
        Ok(())
    }
}

/// Retry policy for every failover step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverPolicies {
    #[serde(default = "default_demote_policy")]
    pub demote: RetryPolicy,
    #[serde(default = "default_drain_policy")]
    pub drain: RetryPolicy,
    #[serde(default = "default_step_policy")]
    pub verify_standby: RetryPolicy,
    #[serde(default = "default_step_policy")]
    pub promote: RetryPolicy,
    #[serde(default = "default_step_policy")]
    pub validate: RetryPolicy,
}

impl Default for FailoverPolicies {
    fn default() -> Self {
        Self {
            demote: default_demote_policy(),
            drain: default_drain_policy(),
            verify_standby: default_step_policy(),
            promote: default_step_policy(),
            validate: default_step_policy(),
        }
    }
}

impl FailoverPolicies {
    pub fn validate(&self) -> Result<()> {
        self.demote.validate("failover.demote")?;
        self.drain.validate("failover.drain")?;
        self.verify_standby.validate("failover.verify_standby")?;
        self.promote.validate("failover.promote")?;
        self.validate.validate("failover.validate")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Abort the whole run and stop its watchers when any kit fails.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self { fail_fast: true }
    }
}
