//! Remote executor contract

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::installer::adapter::InstallProcedureInvocation;
use crate::inventory::device::{Credential, DeviceRecord};
use crate::remote::log::AttemptLog;
use crate::remote::probe::ProbeOutcome;
use crate::utils::tail_chars;

/// Characters of stderr kept as a failed attempt's error summary
pub const ERROR_TAIL_CHARS: usize = 200;

/// Where and as whom to open a remote session
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub device_name: String,
    pub address: Ipv4Addr,
    pub user: String,
    pub credential: Credential,
}

impl RemoteTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

impl From<&DeviceRecord> for RemoteTarget {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            device_name: device.device_name.clone(),
            address: device.remote_address,
            user: device.remote_user.clone(),
            credential: device.credential.clone(),
        }
    }
}

impl From<&InstallProcedureInvocation> for RemoteTarget {
    fn from(invocation: &InstallProcedureInvocation) -> Self {
        Self {
            device_name: invocation.device_name.clone(),
            address: invocation.address,
            user: invocation.user.clone(),
            credential: invocation.credential.clone(),
        }
    }
}

/// Outcome of a completed remote install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Map a non-zero exit to a `RemoteExecutionError` carrying the stderr tail
    pub fn into_result(self) -> Result<ExecutionResult, DeployError> {
        if self.is_success() {
            return Ok(self);
        }
        let mut summary = tail_chars(&self.stderr_tail, ERROR_TAIL_CHARS);
        if summary.is_empty() {
            summary = "Script exited with non-zero status".to_string();
        }
        Err(DeployError::RemoteExecutionError {
            exit_code: self.exit_code,
            summary,
        })
    }
}

/// Opens sessions to devices and runs install procedures on them.
///
/// Implementations never touch the state store; they report through their
/// return value and the attempt log only.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Verify local prerequisites for reaching `targets`
    fn preflight(&self, _targets: &[RemoteTarget]) -> Result<(), DeployError> {
        Ok(())
    }

    /// Open a session and run a no-op; `ConnectionError` when unreachable
    async fn check_connectivity(&self, target: &RemoteTarget) -> Result<(), DeployError>;

    /// Transfer (if needed) and run the install, streaming output to `log`.
    ///
    /// Exceeding `timeout` tears the session down and yields `TimeoutError`.
    /// A non-zero exit is returned as `Ok` with the exit code set.
    async fn run(
        &self,
        invocation: &InstallProcedureInvocation,
        log: &AttemptLog,
        timeout: Duration,
    ) -> Result<ExecutionResult, DeployError>;

    /// Best-effort check whether the monitoring agent is already running
    async fn probe_agent(&self, _target: &RemoteTarget) -> ProbeOutcome {
        ProbeOutcome::Indeterminate
    }
}
