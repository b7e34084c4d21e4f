//! deploy-agents - Entry Point
//!
//! Deploys the Zabbix agent to every device in an inventory CSV.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use secrecy::SecretString;
use tracing::{error, info};

use fleet_deployer::app::options::{clamp_parallel, Action, AppOptions};
use fleet_deployer::app::run::{run, RunStatus};
use fleet_deployer::inventory::device::Platform;
use fleet_deployer::logs::{init_logging, LogLevel, LogOptions};
use fleet_deployer::remote::ssh::{SshExecutor, SshOptions};
use fleet_deployer::state::store::DispatchMode;
use fleet_deployer::storage::layout::StorageLayout;
use fleet_deployer::storage::settings::Settings;
use fleet_deployer::utils::version_info;

/// Exit status for a run-level error
const EXIT_RUN_ERROR: u8 = 2;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Deploy the Zabbix agent to a fleet of edge devices
#[derive(Parser, Debug)]
#[command(name = "deploy-agents")]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Device inventory CSV
    #[arg(long, short = 'i')]
    inventory: PathBuf,

    /// Show what would be deployed without touching any device
    #[arg(long)]
    dry_run: bool,

    /// Only test SSH connectivity and probe for a running agent
    #[arg(long, conflicts_with_all = ["dry_run", "verify_only"])]
    check: bool,

    /// Deploy to a single device
    #[arg(long)]
    device: Option<String>,

    /// Deploy to one platform only (raspberrypi, radxa, macos)
    #[arg(long)]
    platform: Option<Platform>,

    /// Skip devices whose last attempt succeeded
    #[arg(long, conflicts_with_all = ["retry_failed", "force"])]
    resume: bool,

    /// Only retry devices whose last attempt failed
    #[arg(long, conflicts_with = "force")]
    retry_failed: bool,

    /// Deploy to every selected device regardless of recorded state
    #[arg(long)]
    force: bool,

    /// Have devices download the install script instead of copying it
    #[arg(long)]
    github: bool,

    /// Monitoring server API token, forwarded to every install
    #[arg(long, env = "ZABBIX_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Concurrent deployments
    #[arg(long, short = 'p')]
    parallel: Option<usize>,

    /// Directory holding the install scripts
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Directory for device and run logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Deployment state file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Settings file (JSON)
    #[arg(long, env = "DEPLOY_AGENTS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Check registration of deployed devices on the monitoring server
    #[arg(long)]
    verify: bool,

    /// Only check registration; deploy nothing
    #[arg(long)]
    verify_only: bool,

    /// Monitoring server frontend URL
    #[arg(long, env = "ZABBIX_URL")]
    zabbix_url: Option<String>,

    /// Do not ask for confirmation
    #[arg(long, short = 'y')]
    yes: bool,
}

impl Cli {
    fn action(&self) -> Action {
        if self.check {
            Action::Check
        } else if self.verify_only {
            Action::VerifyOnly
        } else {
            Action::Deploy
        }
    }

    fn mode(&self) -> DispatchMode {
        if self.resume {
            DispatchMode::Resume
        } else if self.retry_failed {
            DispatchMode::RetryFailed
        } else {
            DispatchMode::All
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match deploy_agents(cli).await {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::DeviceFailures) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_RUN_ERROR)
        }
    }
}

async fn deploy_agents(cli: Cli) -> Result<RunStatus> {
    let mut settings = Settings::load(cli.config.as_deref()).await?;
    if let Some(url) = &cli.zabbix_url {
        settings.zabbix.url = Some(url.clone());
    }

    let layout = StorageLayout::from_settings(
        &settings.paths,
        cli.scripts_dir.clone(),
        cli.log_dir.clone(),
        cli.state_file.clone(),
    );

    // Dry runs leave the filesystem alone, run log included
    let log_options = LogOptions {
        log_level: cli.log_level.clone().unwrap_or(settings.log_level.clone()),
        log_dir: (!cli.dry_run).then(|| layout.logs_dir.clone()),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = init_logging(log_options)?;

    let version = version_info();
    info!(
        "deploy-agents {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );

    let options = AppOptions {
        action: cli.action(),
        inventory: cli.inventory.clone(),
        layout,
        parallel: clamp_parallel(cli.parallel, &settings.deployment),
        deployment: settings.deployment.clone(),
        zabbix: settings.zabbix.clone(),
        mode: cli.mode(),
        platform_filter: cli.platform,
        device_filter: cli.device.clone(),
        dry_run: cli.dry_run,
        remote_fetch: cli.github,
        verify: cli.verify,
        assume_yes: cli.yes,
        api_token: cli
            .token
            .filter(|token| !token.trim().is_empty())
            .map(SecretString::from),
    };

    let executor = Arc::new(SshExecutor::new(SshOptions {
        connect_timeout: settings.deployment.connect_timeout(),
        ..Default::default()
    }));

    let status = run(options, executor, await_shutdown_signal()).await?;
    Ok(status)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, finishing in-flight devices...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, finishing in-flight devices...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing in-flight devices...");
        }
    }
}
