//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Public location of the install scripts used in remote-fetch mode
pub const DEFAULT_PAYLOAD_BASE_URL: &str =
    "https://raw.githubusercontent.com/emilejacobs/zabbix-rollout/main/scripts";

/// Deployer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Deployment behaviour
    #[serde(default)]
    pub deployment: DeploymentSettings,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathSettings,

    /// Monitoring server API
    #[serde(default)]
    pub zabbix: ZabbixSettings,
}

impl Settings {
    /// Load settings from a JSON file, or defaults when no file is given
    pub async fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        File::new(path).read_json().await.map_err(|e| {
            DeployError::ConfigError(format!(
                "Unable to read settings file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Concurrent device attempts when `--parallel` is not given
    #[serde(default = "default_parallel")]
    pub default_parallel: usize,

    /// Upper bound for `--parallel`
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Hard wall-clock limit for one device's install, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// SSH connect timeout, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Where the payload is copied on the device in local-copy mode
    #[serde(default = "default_remote_payload_path")]
    pub remote_payload_path: String,

    /// Base URL the devices fetch the payload from in remote-fetch mode
    #[serde(default = "default_payload_base_url")]
    pub payload_base_url: String,
}

fn default_parallel() -> usize {
    5
}

fn default_max_parallel() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_remote_payload_path() -> String {
    "/tmp/install-zabbix-agent.sh".to_string()
}

fn default_payload_base_url() -> String {
    DEFAULT_PAYLOAD_BASE_URL.to_string()
}

impl DeploymentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            default_parallel: default_parallel(),
            max_parallel: default_max_parallel(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            remote_payload_path: default_remote_payload_path(),
            payload_base_url: default_payload_base_url(),
        }
    }
}

/// Filesystem locations, relative to the working directory unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("rollout-state.json")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            logs_dir: default_logs_dir(),
            state_file: default_state_file(),
        }
    }
}

/// Monitoring server API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZabbixSettings {
    /// Frontend base URL, e.g. `https://zabbix.example.com`
    #[serde(default)]
    pub url: Option<String>,

    /// Host lookups before a device is declared unregistered
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Initial delay between host lookups, in seconds
    #[serde(default = "default_verify_interval_secs")]
    pub verify_interval_secs: u64,

    /// Latest data older than this counts as stale, in seconds
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

fn default_verify_attempts() -> u32 {
    12
}

fn default_verify_interval_secs() -> u64 {
    10
}

fn default_freshness_secs() -> u64 {
    600
}

impl Default for ZabbixSettings {
    fn default() -> Self {
        Self {
            url: None,
            verify_attempts: default_verify_attempts(),
            verify_interval_secs: default_verify_interval_secs(),
            freshness_secs: default_freshness_secs(),
        }
    }
}
