//! Application configuration options

use std::path::PathBuf;

use secrecy::SecretString;
use tracing::warn;

use crate::inventory::device::Platform;
use crate::state::store::DispatchMode;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeploymentSettings, ZabbixSettings};

/// What a single invocation of the deployer does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Install on the selected devices
    #[default]
    Deploy,

    /// Connectivity pass only
    Check,

    /// Registration check only
    VerifyOnly,
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub action: Action,

    /// Inventory CSV
    pub inventory: PathBuf,

    pub layout: StorageLayout,

    pub deployment: DeploymentSettings,

    pub zabbix: ZabbixSettings,

    pub mode: DispatchMode,

    pub platform_filter: Option<Platform>,

    pub device_filter: Option<String>,

    /// Concurrent device attempts, already clamped
    pub parallel: usize,

    pub dry_run: bool,

    /// Have devices fetch the payload instead of copying it
    pub remote_fetch: bool,

    /// Verify registration of succeeded devices after the run
    pub verify: bool,

    /// Skip the confirmation prompt
    pub assume_yes: bool,

    pub api_token: Option<SecretString>,
}

impl Default for AppOptions {
    fn default() -> Self {
        let deployment = DeploymentSettings::default();
        Self {
            action: Action::Deploy,
            inventory: PathBuf::from("devices.csv"),
            layout: StorageLayout::default(),
            parallel: deployment.default_parallel,
            deployment,
            zabbix: ZabbixSettings::default(),
            mode: DispatchMode::All,
            platform_filter: None,
            device_filter: None,
            dry_run: false,
            remote_fetch: false,
            verify: false,
            assume_yes: false,
            api_token: None,
        }
    }
}

/// Clamp a requested parallelism to `[1, max_parallel]`, warning when the
/// request was out of range
pub fn clamp_parallel(requested: Option<usize>, settings: &DeploymentSettings) -> usize {
    let max = settings.max_parallel.max(1);
    let requested = requested.unwrap_or(settings.default_parallel);
    let clamped = requested.clamp(1, max);
    if clamped != requested {
        warn!(
            "Parallelism {} is out of range, using {} (allowed 1..={})",
            requested, clamped, max
        );
    }
    clamped
}
