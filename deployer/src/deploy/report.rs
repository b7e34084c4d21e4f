//! Console reporting
//!
//! Everything the operator sees on stdout: the deployment plan, dry-run
//! previews, progress lines and the final summary. Diagnostics go through
//! `tracing` instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use colored::Colorize;

use crate::deploy::check::{CheckReport, DeviceCheck};
use crate::deploy::orchestrator::{DeviceOutcome, RunSummary};
use crate::installer::adapter::{InstallProcedureInvocation, PayloadSource};
use crate::inventory::device::{DeviceRecord, Platform};
use crate::state::store::DispatchMode;
use crate::utils::format_duration;
use crate::verify::verifier::RegistrationStatus;

const RULE_WIDTH: usize = 60;

/// Receives progress from the orchestrator's workers
pub trait Reporter: Send + Sync {
    fn device_started(&self, _device: &DeviceRecord, _position: usize, _total: usize) {}

    fn device_finished(&self, _outcome: &DeviceOutcome, _position: usize, _total: usize) {}

    fn dry_run_device(&self, _invocation: &InstallProcedureInvocation) {}
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Prints progress to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn shared() -> Arc<dyn Reporter> {
        Arc::new(ConsoleReporter)
    }
}

impl Reporter for ConsoleReporter {
    fn device_started(&self, device: &DeviceRecord, position: usize, total: usize) {
        println!(
            "{} {} ({}, {})",
            format!("[{}/{}]", position, total).dimmed(),
            device.device_name.bold(),
            device.platform,
            device.remote_address
        );
    }

    fn device_finished(&self, outcome: &DeviceOutcome, position: usize, total: usize) {
        let counter = format!("[{}/{}]", position, total).dimmed();
        let duration = format_duration(outcome.duration);
        if outcome.is_success() {
            println!(
                "{} {} {} ({})",
                counter,
                "✓".green(),
                outcome.device_name,
                duration
            );
        } else {
            println!(
                "{} {} {} ({}): {}",
                counter,
                "✗".red(),
                outcome.device_name,
                duration,
                outcome.error_summary.as_deref().unwrap_or("failed").red()
            );
            if let Some(path) = &outcome.log_path {
                println!("        log: {}", path.display());
            }
        }
    }

    fn dry_run_device(&self, invocation: &InstallProcedureInvocation) {
        println!(
            "{} {} ({})",
            "→".cyan(),
            invocation.device_name.bold(),
            invocation.destination()
        );
        println!("    script:  {}", invocation.descriptor.script_name);
        match &invocation.source {
            PayloadSource::LocalCopy { local_path, .. } => {
                let found = if local_path.is_file() {
                    "found".green()
                } else {
                    "MISSING".red()
                };
                println!("    payload: {} ({})", local_path.display(), found);
            }
            PayloadSource::RemoteFetch { url } => println!("    payload: {}", url),
        }
        println!("    command: {}", invocation.remote_command(true));
    }
}

/// What the operator is about to run
#[derive(Debug, Clone)]
pub struct PlanDescription<'a> {
    pub devices: &'a [Arc<DeviceRecord>],
    pub mode: DispatchMode,
    pub remote_fetch: bool,
    pub has_token: bool,
    pub parallel: usize,
    pub dry_run: bool,
}

fn rule() -> String {
    "─".repeat(RULE_WIDTH)
}

/// Device counts per platform, in display order
pub fn platform_counts(devices: &[Arc<DeviceRecord>]) -> BTreeMap<Platform, usize> {
    let mut counts = BTreeMap::new();
    for device in devices {
        *counts.entry(device.platform).or_insert(0) += 1;
    }
    counts
}

pub fn print_plan(plan: &PlanDescription<'_>) {
    println!("{}", rule());
    let title = if plan.dry_run {
        "Deployment plan (dry run)"
    } else {
        "Deployment plan"
    };
    println!("{}", title.bold());
    println!("{}", rule());
    println!("  Devices:   {}", plan.devices.len());
    for (platform, count) in platform_counts(plan.devices) {
        println!("    {:<12} {}", platform.as_str(), count);
    }
    println!("  Mode:      {}", plan.mode);
    println!(
        "  Method:    {}",
        if plan.remote_fetch {
            "remote fetch"
        } else {
            "local copy (scp)"
        }
    );
    println!(
        "  API token: {}",
        if plan.has_token {
            "provided".green()
        } else {
            "not provided".yellow()
        }
    );
    println!("  Parallel:  {}", plan.parallel);
    println!("{}", rule());
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", rule());
    if summary.dry_run {
        println!("{}", "Dry run complete".bold());
        println!("{}", rule());
        println!("  Would deploy: {}", summary.planned.len());
        println!("  Skipped:      {}", summary.skipped());
        println!("{}", rule());
        return;
    }

    println!("{}", "Deployment summary".bold());
    println!("{}", rule());
    for outcome in &summary.outcomes {
        let status = if outcome.is_success() {
            "success".green()
        } else {
            "failed".red()
        };
        println!(
            "  {:<32} {:<9} {:>8}",
            outcome.device_name,
            status,
            format_duration(outcome.duration)
        );
    }
    if !summary.outcomes.is_empty() {
        println!("{}", rule());
    }

    println!("  Succeeded: {}", summary.succeeded().to_string().green());
    println!("  Failed:    {}", summary.failed().to_string().red());
    println!("  Skipped:   {}", summary.skipped());
    if summary.aborted {
        println!("  {}", "Run aborted before all devices started".yellow());
    }

    if summary.failed() > 0 {
        println!();
        println!("{}", "Failed devices:".red().bold());
        for outcome in summary.failures() {
            println!(
                "  {}: {}",
                outcome.device_name,
                outcome.error_summary.as_deref().unwrap_or("unknown error")
            );
        }
        println!();
        println!("Retry the failed devices with: {}", "--retry-failed".bold());
    } else if summary.aborted {
        println!();
        println!("Continue the rollout with: {}", "--resume".bold());
    }
    println!("{}", rule());
}

pub fn print_check(report: &CheckReport) {
    println!("{}", rule());
    println!("{}", "Connectivity check".bold());
    println!("{}", rule());
    for DeviceCheck {
        device_name,
        address,
        reachable,
        error,
        agent,
    } in &report.devices
    {
        if *reachable {
            println!(
                "  {} {:<32} {:<15} {}",
                "✓".green(),
                device_name,
                address,
                agent.as_str()
            );
        } else {
            println!(
                "  {} {:<32} {:<15} {}",
                "✗".red(),
                device_name,
                address,
                error.as_deref().unwrap_or("unreachable").red()
            );
        }
    }
    println!("{}", rule());
    println!(
        "  Reachable: {}/{}",
        report.reachable(),
        report.devices.len()
    );
    println!("{}", rule());
}

pub fn print_verification(results: &[(String, RegistrationStatus)]) {
    println!("{}", rule());
    println!("{}", "Registration check".bold());
    println!("{}", rule());
    for (device_name, status) in results {
        let state = if !status.registered {
            "not registered".red()
        } else if status.fresh {
            "reporting".green()
        } else {
            "no recent data".yellow()
        };
        let age = status
            .last_data_age
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<32} {:<16} last data: {}", device_name, state, age);
    }
    println!("{}", rule());
}
