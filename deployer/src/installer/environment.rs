//! Environment handed to the install scripts

use secrecy::{ExposeSecret, SecretString};

use crate::inventory::device::DeviceRecord;
use crate::utils::shell_quote;

/// Placeholder printed instead of the API token
pub const REDACTED: &str = "***REDACTED***";

/// Immutable configuration for one install invocation.
///
/// Everything the scripts read from their environment is captured here once
/// per attempt instead of being threaded through as ambient shell state.
#[derive(Debug, Clone)]
pub struct InstallEnvironment {
    pub location: String,
    pub device_name: String,
    pub client: String,
    pub chain: String,
    pub asset_tag: String,
    pub latitude: String,
    pub longitude: String,
    pub api_token: Option<SecretString>,
}

impl InstallEnvironment {
    pub fn for_device(device: &DeviceRecord, api_token: Option<&SecretString>) -> Self {
        Self {
            location: device.location.clone(),
            device_name: device.device_name.clone(),
            client: device.client.clone(),
            chain: device.chain.clone(),
            asset_tag: device.asset_tag.clone(),
            latitude: device.latitude.clone(),
            longitude: device.longitude.clone(),
            api_token: api_token.cloned(),
        }
    }

    /// Variable assignments in option order, skipping empty values
    pub fn assignments(&self, redact: bool) -> Vec<(&'static str, String)> {
        let token = self.api_token.as_ref().map(|t| {
            if redact {
                REDACTED.to_string()
            } else {
                t.expose_secret().to_string()
            }
        });

        [
            ("LOCATION", Some(self.location.clone())),
            ("DEVICE_NAME", Some(self.device_name.clone())),
            ("CLIENT", Some(self.client.clone())),
            ("CHAIN", Some(self.chain.clone())),
            ("ASSET_TAG", Some(self.asset_tag.clone())),
            ("LATITUDE", Some(self.latitude.clone())),
            ("LONGITUDE", Some(self.longitude.clone())),
            ("ZABBIX_API_TOKEN", token),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
        .collect()
    }

    /// `NAME=value` words ready for a shell command line
    pub fn render(&self, redact: bool) -> String {
        self.assignments(redact)
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, shell_quote(&value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
