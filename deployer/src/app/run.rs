//! Main application run flow

use std::future::Future;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::app::options::{Action, AppOptions};
use crate::deploy::check::check_devices;
use crate::deploy::orchestrator::{DeployRequest, Orchestrator, OrchestratorOptions};
use crate::deploy::report::{self, ConsoleReporter, PlanDescription};
use crate::errors::DeployError;
use crate::installer::adapter::InstallerAdapter;
use crate::inventory::device::DeviceRecord;
use crate::inventory::loader::load_inventory;
use crate::remote::executor::{RemoteExecutor, RemoteTarget};
use crate::state::store::{DispatchMode, StateStore};
use crate::verify::verifier::{RegistrationStatus, Verifier, VerifierOptions};
use crate::zabbix::client::ZabbixClient;

/// How a run ended, when it did not end in a run-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every dispatched, checked or verified device was fine
    Success,

    /// At least one device failed, was unreachable or is unregistered
    DeviceFailures,
}

/// Run the deployer
pub async fn run(
    options: AppOptions,
    executor: Arc<dyn RemoteExecutor>,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<RunStatus, DeployError> {
    let devices: Vec<Arc<DeviceRecord>> = load_inventory(&options.inventory)?
        .into_iter()
        .map(Arc::new)
        .collect();
    info!(
        "Loaded {} devices from {}",
        devices.len(),
        options.inventory.display()
    );

    if let Some(name) = &options.device_filter {
        if !devices.iter().any(|d| &d.device_name == name) {
            return Err(DeployError::ConfigError(format!(
                "Device {} is not in the inventory",
                name
            )));
        }
    }
    let targets = select_targets(&devices, &options);

    match options.action {
        Action::VerifyOnly => {
            let verifier = build_verifier(&options)?;
            let names: Vec<String> = targets.iter().map(|d| d.device_name.clone()).collect();
            verify(&verifier, &names).await
        }
        Action::Check => {
            let targets = if options.mode == DispatchMode::All {
                targets
            } else {
                let store = StateStore::open(options.layout.state_file()).await?;
                store.pending_for(&targets, options.mode).await
            };
            preflight(executor.as_ref(), &targets)?;
            let report = check_devices(executor, &targets, options.parallel).await;
            report::print_check(&report);
            for device in report.unreachable() {
                warn!("{} unreachable", device.device_name);
            }
            Ok(if report.all_reachable() {
                RunStatus::Success
            } else {
                RunStatus::DeviceFailures
            })
        }
        Action::Deploy => deploy(options, executor, &devices, shutdown_signal).await,
    }
}

async fn deploy(
    options: AppOptions,
    executor: Arc<dyn RemoteExecutor>,
    devices: &[Arc<DeviceRecord>],
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<RunStatus, DeployError> {
    let verifier = if options.verify && !options.dry_run {
        Some(build_verifier(&options)?)
    } else {
        None
    };
    if options.api_token.is_none() {
        warn!("No API token provided; devices will not set their host tags and inventory");
    }

    let store = Arc::new(StateStore::open(options.layout.state_file()).await?);
    let adapter = InstallerAdapter::new(
        options.layout.scripts_dir.clone(),
        &options.deployment,
        options.remote_fetch,
    );
    let orchestrator = Orchestrator::new(
        executor.clone(),
        store,
        adapter.clone(),
        OrchestratorOptions {
            timeout: options.deployment.timeout(),
            logs_dir: options.layout.logs_dir(),
            api_token: options.api_token.clone(),
        },
    )
    .with_reporter(ConsoleReporter::shared());

    let request = DeployRequest {
        mode: options.mode,
        platform_filter: options.platform_filter,
        device_filter: options.device_filter.clone(),
        concurrency_limit: options.parallel,
        dry_run: options.dry_run,
    };
    let plan = orchestrator.plan(devices, &request).await;

    report::print_plan(&PlanDescription {
        devices: &plan.dispatch,
        mode: options.mode,
        remote_fetch: adapter.is_remote_fetch(),
        has_token: options.api_token.is_some(),
        parallel: options.parallel,
        dry_run: options.dry_run,
    });

    if plan.dispatch.is_empty() {
        println!("Nothing to deploy ({} devices skipped)", plan.skipped.len());
        return Ok(RunStatus::Success);
    }

    if !options.dry_run {
        preflight(executor.as_ref(), &plan.dispatch)?;
        if !options.assume_yes && plan.dispatch.len() > 1 && !confirm(plan.dispatch.len()).await? {
            println!("Aborted");
            return Ok(RunStatus::Success);
        }
        options.layout.setup().await?;
    }

    let summary = orchestrator
        .deploy_until(devices, &request, shutdown_signal)
        .await?;
    report::print_summary(&summary);

    let mut status = if summary.is_success() {
        RunStatus::Success
    } else {
        RunStatus::DeviceFailures
    };

    if let Some(verifier) = verifier {
        let succeeded: Vec<String> = summary
            .outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.device_name.clone())
            .collect();
        if !succeeded.is_empty() && verify(&verifier, &succeeded).await? == RunStatus::DeviceFailures {
            status = RunStatus::DeviceFailures;
        }
    }

    Ok(status)
}

/// Devices the options' filters select, in inventory order
fn select_targets(devices: &[Arc<DeviceRecord>], options: &AppOptions) -> Vec<Arc<DeviceRecord>> {
    devices
        .iter()
        .filter(|d| {
            options
                .device_filter
                .as_ref()
                .map_or(true, |name| name == &d.device_name)
        })
        .filter(|d| options.platform_filter.map_or(true, |p| p == d.platform))
        .cloned()
        .collect()
}

fn preflight(executor: &dyn RemoteExecutor, devices: &[Arc<DeviceRecord>]) -> Result<(), DeployError> {
    let targets: Vec<RemoteTarget> = devices.iter().map(|d| RemoteTarget::from(d.as_ref())).collect();
    executor.preflight(&targets)
}

fn build_verifier(options: &AppOptions) -> Result<Verifier, DeployError> {
    let url = options.zabbix.url.as_deref().ok_or_else(|| {
        DeployError::ConfigError("Verification needs the monitoring server URL (--zabbix-url)".to_string())
    })?;
    let token: SecretString = options.api_token.clone().ok_or_else(|| {
        DeployError::ConfigError("Verification needs an API token (--token or ZABBIX_API_TOKEN)".to_string())
    })?;
    let client = ZabbixClient::new(url, token)?;
    Ok(Verifier::new(client, VerifierOptions::from_settings(&options.zabbix)))
}

async fn verify(verifier: &Verifier, device_names: &[String]) -> Result<RunStatus, DeployError> {
    info!("Verifying registration of {} devices", device_names.len());
    let mut results: Vec<(String, RegistrationStatus)> = Vec::with_capacity(device_names.len());
    let mut status = RunStatus::Success;

    for (name, result) in verifier.check_all(device_names).await {
        match result {
            Ok(registration) => {
                if !registration.registered {
                    status = RunStatus::DeviceFailures;
                } else if !registration.fresh {
                    warn!("{} is registered but has no recent data", name);
                }
                results.push((name, registration));
            }
            Err(e) => {
                error!("Unable to verify {}: {}", name, e);
                status = RunStatus::DeviceFailures;
                results.push((name, RegistrationStatus::default()));
            }
        }
    }

    report::print_verification(&results);
    Ok(status)
}

/// Ask the operator before touching `count` devices
async fn confirm(count: usize) -> Result<bool, DeployError> {
    if !std::io::stdin().is_terminal() {
        return Err(DeployError::ConfigError(
            "Refusing to deploy to multiple devices without a terminal; pass --yes".to_string(),
        ));
    }

    tokio::task::spawn_blocking(move || -> Result<bool, DeployError> {
        print!("Deploy to {} devices? [y/N] ", count);
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    })
    .await
    .map_err(|e| DeployError::Internal(e.to_string()))?
}
