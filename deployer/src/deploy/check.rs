//! Connectivity pass
//!
//! Opens a session to every device without installing anything, and probes
//! whether the monitoring agent is already running. Concurrency is bounded
//! by a semaphore like a deployment run.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::inventory::device::DeviceRecord;
use crate::remote::executor::{RemoteExecutor, RemoteTarget};
use crate::remote::probe::ProbeOutcome;

/// Result of checking one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCheck {
    pub device_name: String,
    pub address: Ipv4Addr,
    pub reachable: bool,

    /// Present iff unreachable
    pub error: Option<String>,

    /// `Indeterminate` when unreachable
    pub agent: ProbeOutcome,
}

/// Results in inventory order
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub devices: Vec<DeviceCheck>,
}

impl CheckReport {
    pub fn reachable(&self) -> usize {
        self.devices.iter().filter(|d| d.reachable).count()
    }

    pub fn unreachable(&self) -> impl Iterator<Item = &DeviceCheck> {
        self.devices.iter().filter(|d| !d.reachable)
    }

    pub fn all_reachable(&self) -> bool {
        self.devices.iter().all(|d| d.reachable)
    }
}

/// Check every device in `devices`, at most `concurrency_limit` at a time
pub async fn check_devices(
    executor: Arc<dyn RemoteExecutor>,
    devices: &[Arc<DeviceRecord>],
    concurrency_limit: usize,
) -> CheckReport {
    info!("Checking connectivity to {} devices", devices.len());

    let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
    let mut handles = Vec::with_capacity(devices.len());

    for device in devices {
        let sem = Arc::clone(&semaphore);
        let executor = Arc::clone(&executor);
        let target = RemoteTarget::from(device.as_ref());
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            check_device(executor.as_ref(), target).await
        }));
    }

    let mut report = CheckReport::default();
    for (handle, device) in handles.into_iter().zip(devices) {
        let check = match handle.await {
            Ok(check) => check,
            Err(e) => DeviceCheck {
                device_name: device.device_name.clone(),
                address: device.remote_address,
                reachable: false,
                error: Some(format!("Unexpected error: {}", e)),
                agent: ProbeOutcome::Indeterminate,
            },
        };
        debug!("{}: reachable={} agent={}", check.device_name, check.reachable, check.agent.as_str());
        report.devices.push(check);
    }

    info!(
        "Connectivity check complete: {}/{} reachable",
        report.reachable(),
        report.devices.len()
    );
    report
}

async fn check_device(executor: &dyn RemoteExecutor, target: RemoteTarget) -> DeviceCheck {
    match executor.check_connectivity(&target).await {
        Ok(()) => {
            let agent = executor.probe_agent(&target).await;
            DeviceCheck {
                device_name: target.device_name,
                address: target.address,
                reachable: true,
                error: None,
                agent,
            }
        }
        Err(e) => DeviceCheck {
            device_name: target.device_name,
            address: target.address,
            reachable: false,
            error: Some(e.to_string()),
            agent: ProbeOutcome::Indeterminate,
        },
    }
}
