//! Device records

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Supported device platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    RaspberryPi,
    Radxa,
    MacOs,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::MacOs, Platform::Radxa, Platform::RaspberryPi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::RaspberryPi => "raspberrypi",
            Platform::Radxa => "radxa",
            Platform::MacOs => "macos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raspberrypi" => Ok(Platform::RaspberryPi),
            "radxa" => Ok(Platform::Radxa),
            "macos" => Ok(Platform::MacOs),
            other => Err(DeployError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// How the deployer authenticates to a device
#[derive(Debug, Clone)]
pub enum Credential {
    /// Password fed to `sshpass`
    Password(SecretString),

    /// Private key file (inventory value `key:<path>`)
    KeyFile(PathBuf),
}

impl Credential {
    /// Parse the inventory's `ssh_password` cell
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix("key:") {
            Some(path) if !path.trim().is_empty() => Credential::KeyFile(PathBuf::from(path.trim())),
            _ => Credential::Password(SecretString::from(value.to_string())),
        }
    }

    pub fn needs_sshpass(&self) -> bool {
        matches!(self, Credential::Password(_))
    }
}

/// One validated inventory row. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_name: String,
    pub platform: Platform,
    pub remote_address: Ipv4Addr,
    pub location: String,
    pub client: String,
    pub chain: String,
    pub asset_tag: String,
    pub latitude: String,
    pub longitude: String,
    pub remote_user: String,
    pub credential: Credential,
}
