//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleet_deployer::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use fleet_deployer::errors::DeployError;
use fleet_deployer::filesys::dir::Dir;
use fleet_deployer::filesys::file::File;
use fleet_deployer::installer::adapter::{InstallProcedureInvocation, InstallerAdapter};
use fleet_deployer::inventory::device::DeviceRecord;
use fleet_deployer::inventory::loader::parse_inventory;
use fleet_deployer::remote::executor::{ExecutionResult, RemoteExecutor, RemoteTarget};
use fleet_deployer::remote::log::AttemptLog;
use fleet_deployer::state::store::StateStore;
use fleet_deployer::storage::settings::DeploymentSettings;

pub const HEADER: &str =
    "device_name,platform,tailscale_ip,location,client,chain,asset_tag,latitude,longitude,ssh_user,ssh_password\n";

/// Parse `name,platform` pairs into a shared device list
pub fn devices(rows: &[(&str, &str)]) -> Vec<Arc<DeviceRecord>> {
    let mut csv = HEADER.to_string();
    for (i, (name, platform)) in rows.iter().enumerate() {
        csv.push_str(&format!(
            "{},{},100.64.0.{},london,acme,north,,,,pi,secret\n",
            name,
            platform,
            i + 1
        ));
    }
    parse_inventory(csv.as_bytes())
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect()
}

/// What the mock does for a device
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    Exit(i32, &'static str),
    Hang,
    Unreachable,
    /// The controller cannot write or spawn something for this attempt
    LocalFault,
    /// The executor hits a bug
    Crash,
}

/// Remote executor that never leaves the process
pub struct MockExecutor {
    delay: Duration,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    sessions: AtomicUsize,
    preflights: AtomicUsize,
    checks: Mutex<Vec<String>>,
    started: Mutex<Vec<String>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            behaviours: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            preflights: AtomicUsize::new(0),
            checks: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, device_name: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(device_name.to_string(), behaviour);
    }

    /// Most sessions ever open at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn preflights(&self) -> usize {
        self.preflights.load(Ordering::SeqCst)
    }

    /// Device names whose connectivity was checked, sorted
    pub fn checked(&self) -> Vec<String> {
        let mut checked = self.checks.lock().unwrap().clone();
        checked.sort();
        checked
    }

    /// Device names in the order their sessions opened
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn behaviour(&self, device_name: &str) -> Behaviour {
        self.behaviours
            .lock()
            .unwrap()
            .get(device_name)
            .cloned()
            .unwrap_or(Behaviour::Succeed)
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    fn preflight(&self, _targets: &[RemoteTarget]) -> Result<(), DeployError> {
        self.preflights.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_connectivity(&self, target: &RemoteTarget) -> Result<(), DeployError> {
        self.checks.lock().unwrap().push(target.device_name.clone());
        match self.behaviour(&target.device_name) {
            Behaviour::Unreachable => Err(DeployError::ConnectionError("No route to host".into())),
            _ => Ok(()),
        }
    }

    async fn run(
        &self,
        invocation: &InstallProcedureInvocation,
        _log: &AttemptLog,
        timeout: Duration,
    ) -> Result<ExecutionResult, DeployError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        self.started
            .lock()
            .unwrap()
            .push(invocation.device_name.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let result = |exit_code: i32, stderr: &str| ExecutionResult {
            exit_code,
            stdout_tail: String::new(),
            stderr_tail: stderr.to_string(),
            duration: self.delay,
        };

        match self.behaviour(&invocation.device_name) {
            Behaviour::Succeed => {
                tokio::time::sleep(self.delay).await;
                Ok(result(0, ""))
            }
            Behaviour::Exit(code, stderr) => {
                tokio::time::sleep(self.delay).await;
                Ok(result(code, stderr))
            }
            Behaviour::Hang => {
                tokio::time::sleep(timeout).await;
                Err(DeployError::TimeoutError(timeout))
            }
            Behaviour::Unreachable => Err(DeployError::ConnectionError(format!(
                "Cannot connect to {}",
                invocation.destination()
            ))),
            Behaviour::LocalFault => Err(DeployError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "log directory is read-only",
            ))),
            Behaviour::Crash => Err(DeployError::Internal("executor state lost".into())),
        }
    }
}

pub async fn open_store(path: &Path) -> Arc<StateStore> {
    Arc::new(StateStore::open(File::new(path)).await.unwrap())
}

pub fn orchestrator(
    executor: Arc<MockExecutor>,
    store: Arc<StateStore>,
    workdir: &Path,
    timeout: Duration,
) -> Orchestrator {
    let adapter = InstallerAdapter::new(workdir.join("scripts"), &DeploymentSettings::default(), false);
    Orchestrator::new(
        executor,
        store,
        adapter,
        OrchestratorOptions {
            timeout,
            logs_dir: Dir::new(workdir.join("logs")),
            api_token: None,
        },
    )
}
