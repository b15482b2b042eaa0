//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Agent configuration model, loading and validation."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Poll interval used when the configured value is missing or not positive.
pub const DEFAULT_DAEMON_INTERVAL: Duration = Duration::from_secs(300);

fn default_storage_directory() -> PathBuf {
    PathBuf::from("/var/lib/fleetup")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/fleetup")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_daemon_interval() -> Duration {
    DEFAULT_DAEMON_INTERVAL
}

fn default_max_start_attempts() -> u32 {
    3
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:9898"
        .parse()
        .expect("valid default metrics address")
}

/// `https://host/prefix` becomes `https://host/prefix/`; `Url::join` would
/// otherwise replace the last segment.
pub fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn default_base_url() -> Url {
    Url::parse("https://localhost").expect("valid default base url")
}

/// Primary configuration object for the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "FLEETUP_CONFIG";

    /// Candidate locations inspected when no explicit path is supplied.
    pub fn default_candidates() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/etc/fleetup/fleetup.toml"),
            PathBuf::from("fleetup.toml"),
        ]
    }

    /// Load configuration from disk, respecting the `FLEETUP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let mut config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.server.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.server.validate()?;
        self.daemon.validate()?;
        Ok(())
    }

    /// Path of the SQLite database holding install history and queued events.
    pub fn database_path(&self) -> PathBuf {
        self.storage.directory.join("sql.db")
    }

    /// Path of the cached target metadata document.
    pub fn targets_cache_path(&self) -> PathBuf {
        self.storage.directory.join("targets.json")
    }

    /// Directory owned by the local runtime.
    pub fn runtime_directory(&self) -> PathBuf {
        self.storage.directory.join("runtime")
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let mut config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.server.normalize();
        config.validate()?;
        Ok(config)
    }
}

/// Identity of this device and the workloads it is allowed to run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub hardware_id: String,
    #[serde(default)]
    pub ecu_serial: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `None` enables every app of a target; `Some(vec![])` enables none.
    #[serde(default)]
    pub enabled_apps: Option<Vec<String>>,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hardware_id.trim().is_empty() {
            return Err(anyhow!("device.hardware_id must not be empty"));
        }
        Ok(())
    }

    /// ECU serial reported in install records, defaulting to the hardware id.
    pub fn ecu_serial(&self) -> &str {
        self.ecu_serial.as_deref().unwrap_or(&self.hardware_id)
    }
}

/// Flavour of target metadata served by the update server.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataMode {
    #[default]
    Plain,
    Signed,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub metadata: MetadataMode,
    /// Base64 encoded ed25519 public key used in signed metadata mode.
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            metadata: MetadataMode::default(),
            signing_key: None,
        }
    }
}

impl ServerConfig {
    /// Give `base_url` a trailing slash so endpoints resolve beneath its path.
    pub fn normalize(&mut self) {
        self.base_url = directory_url(self.base_url.clone());
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata == MetadataMode::Signed && self.signing_key.is_none() {
            return Err(anyhow!(
                "server.signing_key is required when server.metadata = \"signed\""
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("server.request_timeout must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
        }
    }
}

/// Settings for the bundled local runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Program invoked as `<hook> <action> <uri>...` for workload side effects.
    #[serde(default)]
    pub hook: Option<PathBuf>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_max_start_attempts")]
    pub max_start_attempts: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_daemon_interval(),
            max_start_attempts: default_max_start_attempts(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_start_attempts == 0 {
            return Err(anyhow!("daemon.max_start_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Interval between update attempts; non-positive values fall back to the default.
    pub fn effective_interval(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_DAEMON_INTERVAL
        } else {
            self.interval
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventsConfig {
    /// Emit `UpdateInitStarted`/`UpdateInitCompleted` from the Init phase.
    #[serde(default)]
    pub report_init: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
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
