//! Device installer adapter
//!
//! Maps a platform to its install payload and builds the per-attempt
//! invocation. Resolution is a pure function of the platform.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::errors::DeployError;
use crate::installer::environment::InstallEnvironment;
use crate::inventory::device::{Credential, DeviceRecord, Platform};
use crate::storage::settings::DeploymentSettings;
use crate::utils::shell_quote;

/// An environment option understood by the install scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvOption {
    pub name: &'static str,
    pub effect: &'static str,
}

/// Environment options recognized by every platform script, in order
pub const ENV_OPTIONS: &[EnvOption] = &[
    EnvOption {
        name: "LOCATION",
        effect: "location identifier used in the generated hostname and host metadata",
    },
    EnvOption {
        name: "DEVICE_NAME",
        effect: "overrides the auto-generated hostname",
    },
    EnvOption {
        name: "CLIENT",
        effect: "client tag value",
    },
    EnvOption {
        name: "CHAIN",
        effect: "chain tag value",
    },
    EnvOption {
        name: "ASSET_TAG",
        effect: "asset tag inventory field",
    },
    EnvOption {
        name: "LATITUDE",
        effect: "inventory latitude",
    },
    EnvOption {
        name: "LONGITUDE",
        effect: "inventory longitude",
    },
    EnvOption {
        name: "ZABBIX_API_TOKEN",
        effect: "enables the tag and inventory population step",
    },
];

/// Which payload to run for a platform and how to invoke it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallProcedureDescriptor {
    pub platform: Platform,

    /// Script file name, both in the local scripts directory and upstream
    pub script_name: &'static str,

    /// Run under `sudo -E` (Homebrew needs the caller's environment)
    pub preserve_env: bool,

    pub env_options: &'static [EnvOption],
}

/// Resolve the install procedure for a platform
pub fn resolve(platform: Platform) -> Result<InstallProcedureDescriptor, DeployError> {
    let (script_name, preserve_env) = match platform {
        Platform::RaspberryPi => ("install-zabbix-agent-raspberrypi.sh", false),
        Platform::Radxa => ("install-zabbix-agent-radxa.sh", false),
        Platform::MacOs => ("install-zabbix-agent-macos.sh", true),
    };
    Ok(InstallProcedureDescriptor {
        platform,
        script_name,
        preserve_env,
        env_options: ENV_OPTIONS,
    })
}

/// Where the payload comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// Copy a local script to `remote_path` on the device, then run it
    LocalCopy { local_path: PathBuf, remote_path: String },

    /// Have the device fetch the script itself
    RemoteFetch { url: String },
}

/// Everything needed to run one install on one device. Built per attempt.
#[derive(Debug, Clone)]
pub struct InstallProcedureInvocation {
    pub descriptor: InstallProcedureDescriptor,
    pub device_name: String,
    pub address: Ipv4Addr,
    pub user: String,
    pub credential: Credential,
    pub hostname: String,
    pub location: String,
    pub environment: InstallEnvironment,
    pub source: PayloadSource,
}

impl InstallProcedureInvocation {
    /// `user@address` destination for ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    /// Remote shell command that runs the install
    pub fn remote_command(&self, redact: bool) -> String {
        let sudo = if self.descriptor.preserve_env { "sudo -E" } else { "sudo" };
        let env = self.environment.render(redact);
        let sudo_env = if env.is_empty() {
            sudo.to_string()
        } else {
            format!("{} {}", sudo, env)
        };
        let args = format!("{} {}", shell_quote(&self.hostname), shell_quote(&self.location));

        match &self.source {
            PayloadSource::LocalCopy { remote_path, .. } => {
                format!("{} bash {} {}", sudo_env, shell_quote(remote_path), args)
            }
            PayloadSource::RemoteFetch { url } => format!(
                "curl -fsSL {} | {} bash -s -- {}",
                shell_quote(url),
                sudo_env,
                args
            ),
        }
    }

    /// Best-effort cleanup after a local-copy run
    pub fn cleanup_command(&self) -> Option<String> {
        match &self.source {
            PayloadSource::LocalCopy { remote_path, .. } => {
                Some(format!("rm -f {}", shell_quote(remote_path)))
            }
            PayloadSource::RemoteFetch { .. } => None,
        }
    }
}

/// Builds invocations for devices under one run's payload settings
#[derive(Debug, Clone)]
pub struct InstallerAdapter {
    scripts_dir: PathBuf,
    remote_payload_path: String,
    payload_base_url: String,
    remote_fetch: bool,
}

impl InstallerAdapter {
    pub fn new(scripts_dir: impl Into<PathBuf>, settings: &DeploymentSettings, remote_fetch: bool) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            remote_payload_path: settings.remote_payload_path.clone(),
            payload_base_url: settings.payload_base_url.trim_end_matches('/').to_string(),
            remote_fetch,
        }
    }

    pub fn is_remote_fetch(&self) -> bool {
        self.remote_fetch
    }

    /// Payload source for a descriptor under this adapter's mode
    pub fn source_for(&self, descriptor: &InstallProcedureDescriptor) -> PayloadSource {
        if self.remote_fetch {
            PayloadSource::RemoteFetch {
                url: format!("{}/{}", self.payload_base_url, descriptor.script_name),
            }
        } else {
            PayloadSource::LocalCopy {
                local_path: self.scripts_dir.join(descriptor.script_name),
                remote_path: self.remote_payload_path.clone(),
            }
        }
    }

    /// Build the invocation for one device attempt
    pub fn invocation(
        &self,
        device: &DeviceRecord,
        api_token: Option<&SecretString>,
    ) -> Result<InstallProcedureInvocation, DeployError> {
        let descriptor = resolve(device.platform)?;
        let source = self.source_for(&descriptor);
        Ok(InstallProcedureInvocation {
            descriptor,
            device_name: device.device_name.clone(),
            address: device.remote_address,
            user: device.remote_user.clone(),
            credential: device.credential.clone(),
            hostname: device.device_name.clone(),
            location: device.location.clone(),
            environment: InstallEnvironment::for_device(device, api_token),
            source,
        })
    }
}
