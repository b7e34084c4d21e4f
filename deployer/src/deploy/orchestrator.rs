//! Fleet deployment orchestrator
//!
//! Applies the run's filters and dispatch mode to the inventory, then runs
//! one attempt per selected device on a bounded pool of workers. Devices
//! start in inventory order; completion order is unspecified. Per-device
//! failures become failed attempts; only state store and internal errors
//! abort the run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::deploy::fsm::AttemptEvent;
use crate::deploy::report::{NullReporter, Reporter};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::installer::adapter::InstallerAdapter;
use crate::inventory::device::{DeviceRecord, Platform};
use crate::remote::executor::{ExecutionResult, RemoteExecutor};
use crate::remote::log::{AttemptLog, LogHeader};
use crate::state::attempt::{AttemptStatus, DeploymentAttempt};
use crate::state::store::{DeploymentState, DispatchMode, RunFilter, RunMetadata, StateStore};

/// Extra time granted to the executor past its own timeout before the
/// orchestrator gives up on it
const EXECUTOR_GRACE: Duration = Duration::from_secs(30);

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Hard wall-clock limit per device attempt
    pub timeout: Duration,

    /// Directory for per-attempt logs
    pub logs_dir: Dir,

    /// Forwarded to every install as `ZABBIX_API_TOKEN`
    pub api_token: Option<SecretString>,
}

/// One orchestration request
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub mode: DispatchMode,
    pub platform_filter: Option<Platform>,
    pub device_filter: Option<String>,
    pub concurrency_limit: usize,
    pub dry_run: bool,
}

impl Default for DeployRequest {
    fn default() -> Self {
        Self {
            mode: DispatchMode::All,
            platform_filter: None,
            device_filter: None,
            concurrency_limit: 5,
            dry_run: false,
        }
    }
}

impl DeployRequest {
    fn filter(&self) -> RunFilter {
        RunFilter {
            mode: self.mode,
            platform: self.platform_filter,
            device: self.device_filter.clone(),
        }
    }
}

/// Why a device was left out of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PlatformFilter,
    DeviceFilter,
    AlreadySucceeded,
    NotFailed,
    Aborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::PlatformFilter => "excluded by platform filter",
            SkipReason::DeviceFilter => "excluded by device filter",
            SkipReason::AlreadySucceeded => "already deployed successfully",
            SkipReason::NotFailed => "no failed attempt to retry",
            SkipReason::Aborted => "not started, run aborted",
        })
    }
}

/// A device that was not attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDevice {
    pub device_name: String,
    pub reason: SkipReason,
}

/// Devices selected for dispatch, in inventory order, and the rest
#[derive(Debug, Clone, Default)]
pub struct DispatchPlan {
    pub dispatch: Vec<Arc<DeviceRecord>>,
    pub skipped: Vec<SkippedDevice>,
}

impl DispatchPlan {
    /// Apply filters, then the dispatch mode against recorded state
    pub fn build(
        devices: &[Arc<DeviceRecord>],
        request: &DeployRequest,
        state: &DeploymentState,
    ) -> Self {
        let (filtered, skipped) = Self::filter(devices, request);
        let selected = state.pending_for(&filtered, request.mode);
        Self::select(filtered, skipped, selected, request.mode)
    }

    /// Apply the device and platform filters, in that order
    fn filter(
        devices: &[Arc<DeviceRecord>],
        request: &DeployRequest,
    ) -> (Vec<Arc<DeviceRecord>>, Vec<SkippedDevice>) {
        let mut filtered = Vec::new();
        let mut skipped = Vec::new();
        for device in devices {
            let reason = if request
                .device_filter
                .as_ref()
                .is_some_and(|name| name != &device.device_name)
            {
                Some(SkipReason::DeviceFilter)
            } else if request
                .platform_filter
                .is_some_and(|platform| platform != device.platform)
            {
                Some(SkipReason::PlatformFilter)
            } else {
                None
            };

            match reason {
                Some(reason) => skipped.push(SkippedDevice {
                    device_name: device.device_name.clone(),
                    reason,
                }),
                None => filtered.push(device.clone()),
            }
        }
        (filtered, skipped)
    }

    /// Split the filtered devices into those the dispatch mode selected and
    /// those it passed over
    fn select(
        filtered: Vec<Arc<DeviceRecord>>,
        mut skipped: Vec<SkippedDevice>,
        selected: Vec<Arc<DeviceRecord>>,
        mode: DispatchMode,
    ) -> Self {
        {
            let chosen: HashSet<&str> =
                selected.iter().map(|d| d.device_name.as_str()).collect();
            let mode_reason = match mode {
                DispatchMode::RetryFailed => SkipReason::NotFailed,
                _ => SkipReason::AlreadySucceeded,
            };
            skipped.extend(
                filtered
                    .iter()
                    .filter(|d| !chosen.contains(d.device_name.as_str()))
                    .map(|d| SkippedDevice {
                        device_name: d.device_name.clone(),
                        reason: mode_reason,
                    }),
            );
        }
        DispatchPlan {
            dispatch: selected,
            skipped,
        }
    }
}

/// Terminal result of one device attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOutcome {
    pub device_name: String,
    pub status: AttemptStatus,
    pub duration: Duration,
    pub error_kind: Option<String>,
    pub error_summary: Option<String>,
    pub log_path: Option<PathBuf>,
}

impl DeviceOutcome {
    fn from_attempt(device_name: &str, attempt: &DeploymentAttempt, duration: Duration) -> Self {
        Self {
            device_name: device_name.to_string(),
            status: attempt.status,
            duration,
            error_kind: attempt.error_kind.clone(),
            error_summary: attempt.error_summary.clone(),
            log_path: attempt.log_path.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// Summary of an orchestration run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// `None` for dry runs, which record nothing
    pub run_id: Option<Uuid>,

    pub dry_run: bool,

    /// Names selected for dispatch, in start order
    pub planned: Vec<String>,

    /// One entry per attempted device, in start order
    pub outcomes: Vec<DeviceOutcome>,

    pub skipped: Vec<SkippedDevice>,

    /// An abort request stopped the run before every device started
    pub aborted: bool,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.skipped.len()
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Every dispatched device succeeded and the run was not cut short
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.aborted
    }
}

/// Fleet deployment orchestrator
pub struct Orchestrator {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<StateStore>,
    adapter: InstallerAdapter,
    options: OrchestratorOptions,
    reporter: Arc<dyn Reporter>,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<StateStore>,
        adapter: InstallerAdapter,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            executor,
            store,
            adapter,
            options,
            reporter: Arc::new(NullReporter),
        }
    }

    /// Report progress through `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Compute the dispatch plan against the store's current state
    pub async fn plan(&self, devices: &[Arc<DeviceRecord>], request: &DeployRequest) -> DispatchPlan {
        let (filtered, skipped) = DispatchPlan::filter(devices, request);
        let selected = self.store.pending_for(&filtered, request.mode).await;
        DispatchPlan::select(filtered, skipped, selected, request.mode)
    }

    /// Run a deployment to completion
    pub async fn deploy(
        &self,
        devices: &[Arc<DeviceRecord>],
        request: &DeployRequest,
    ) -> Result<RunSummary, DeployError> {
        self.deploy_until(devices, request, std::future::pending()).await
    }

    /// Run a deployment, draining once `abort` resolves: in-flight devices
    /// finish and are recorded, queued devices are reported as skipped.
    pub async fn deploy_until<A>(
        &self,
        devices: &[Arc<DeviceRecord>],
        request: &DeployRequest,
        abort: A,
    ) -> Result<RunSummary, DeployError>
    where
        A: Future<Output = ()> + Send,
    {
        let plan = self.plan(devices, request).await;
        let planned: Vec<String> = plan.dispatch.iter().map(|d| d.device_name.clone()).collect();
        info!(
            "Dispatch set: {} devices ({} skipped, mode {})",
            plan.dispatch.len(),
            plan.skipped.len(),
            request.mode
        );

        if request.dry_run {
            for device in &plan.dispatch {
                match self.adapter.invocation(device, self.options.api_token.as_ref()) {
                    Ok(invocation) => self.reporter.dry_run_device(&invocation),
                    Err(e) => warn!("{}: {}", device.device_name, e),
                }
            }
            return Ok(RunSummary {
                run_id: None,
                dry_run: true,
                planned,
                outcomes: Vec::new(),
                skipped: plan.skipped,
                aborted: false,
            });
        }

        let run = RunMetadata::new(request.filter());
        let run_id = run.run_id;
        self.store.begin_run(run).await?;
        if !plan.dispatch.is_empty() {
            self.options.logs_dir.create().await?;
        }

        let total = plan.dispatch.len();
        let semaphore = Arc::new(Semaphore::new(request.concurrency_limit.max(1)));
        let mut tasks: JoinSet<Result<DeviceOutcome, DeployError>> = JoinSet::new();
        let mut task_index = HashMap::new();
        let mut outcomes: Vec<Option<DeviceOutcome>> = vec![None; total];
        let mut fatal: Option<DeployError> = None;
        let mut started = 0;
        let mut aborted = false;
        let mut abort = std::pin::pin!(abort);

        for (index, device) in plan.dispatch.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = &mut abort => {
                    warn!("Abort requested; draining {} in-flight devices", tasks.len());
                    aborted = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| DeployError::Internal(e.to_string()))?
                }
            };

            while let Some(joined) = tasks.try_join_next_with_id() {
                self.collect(joined, &task_index, &plan, &mut outcomes, &mut fatal);
            }
            if fatal.is_some() {
                break;
            }

            let worker = Worker {
                executor: self.executor.clone(),
                store: self.store.clone(),
                adapter: self.adapter.clone(),
                reporter: self.reporter.clone(),
                logs_dir: self.options.logs_dir.clone(),
                timeout: self.options.timeout,
                api_token: self.options.api_token.clone(),
                run_id,
            };
            let device = device.clone();
            let handle = tasks.spawn(async move {
                let outcome = worker.attempt(device, index, total).await;
                drop(permit);
                outcome
            });
            task_index.insert(handle.id(), index);
            started += 1;
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.collect(joined, &task_index, &plan, &mut outcomes, &mut fatal);
        }

        if let Some(e) = fatal {
            error!("Run {} aborted: {}", run_id, e);
            return Err(e);
        }

        let mut skipped = plan.skipped;
        skipped.extend(plan.dispatch[started..].iter().map(|d| SkippedDevice {
            device_name: d.device_name.clone(),
            reason: SkipReason::Aborted,
        }));

        let summary = RunSummary {
            run_id: Some(run_id),
            dry_run: false,
            planned,
            outcomes: outcomes.into_iter().flatten().collect(),
            skipped,
            aborted,
        };
        info!(
            "Run {} complete: {} succeeded, {} failed, {} skipped",
            run_id,
            summary.succeeded(),
            summary.failed(),
            summary.skipped()
        );
        Ok(summary)
    }

    fn collect(
        &self,
        joined: Result<(tokio::task::Id, Result<DeviceOutcome, DeployError>), tokio::task::JoinError>,
        task_index: &HashMap<tokio::task::Id, usize>,
        plan: &DispatchPlan,
        outcomes: &mut [Option<DeviceOutcome>],
        fatal: &mut Option<DeployError>,
    ) {
        match joined {
            Ok((id, Ok(outcome))) => {
                if let Some(&index) = task_index.get(&id) {
                    outcomes[index] = Some(outcome);
                }
            }
            Ok((_, Err(e))) => {
                if fatal.is_none() {
                    *fatal = Some(e);
                }
            }
            Err(join_error) => {
                let Some(&index) = task_index.get(&join_error.id()) else {
                    return;
                };
                let device_name = plan.dispatch[index].device_name.clone();
                error!("Worker for {} crashed: {}", device_name, join_error);
                let outcome = DeviceOutcome {
                    device_name,
                    status: AttemptStatus::Failed,
                    duration: Duration::ZERO,
                    error_kind: Some("internal".to_string()),
                    error_summary: Some(format!("Unexpected error: {}", join_error)),
                    log_path: None,
                };
                self.reporter.device_finished(&outcome, index + 1, plan.dispatch.len());
                outcomes[index] = Some(outcome);
            }
        }
    }
}

/// One unit of work: a single device's attempt
struct Worker {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<StateStore>,
    adapter: InstallerAdapter,
    reporter: Arc<dyn Reporter>,
    logs_dir: Dir,
    timeout: Duration,
    api_token: Option<SecretString>,
    run_id: Uuid,
}

impl Worker {
    /// Resolve, mark running, execute, mark terminal. Only state store and
    /// internal errors escape; everything else is recorded on the attempt.
    async fn attempt(
        &self,
        device: Arc<DeviceRecord>,
        index: usize,
        total: usize,
    ) -> Result<DeviceOutcome, DeployError> {
        let name = device.device_name.as_str();
        self.reporter.device_started(&device, index + 1, total);
        let clock = Instant::now();

        let log = AttemptLog::for_attempt(&self.logs_dir, name, Utc::now());
        let mut attempt = DeploymentAttempt::new(self.run_id, Some(log.path().to_path_buf()));

        let invocation = match self.adapter.invocation(&device, self.api_token.as_ref()) {
            Ok(invocation) => invocation,
            Err(e) => {
                let header = LogHeader {
                    device_name: name.to_string(),
                    platform: device.platform.to_string(),
                    address: device.remote_address.to_string(),
                    location: device.location.clone(),
                    command: String::new(),
                };
                if let Err(log_error) = log.write_failure(&header, &e).await {
                    debug!("Could not write log for {}: {}", name, log_error);
                }
                attempt.fail_with(&e)?;
                return self.finish(name, attempt, clock, index, total).await;
            }
        };

        attempt.apply(AttemptEvent::Start)?;
        self.store.record_attempt(name, &attempt).await?;

        let result = match tokio::time::timeout(
            self.timeout + EXECUTOR_GRACE,
            self.executor.run(&invocation, &log, self.timeout),
        )
        .await
        {
            Ok(result) => result.and_then(ExecutionResult::into_result),
            Err(_) => Err(DeployError::TimeoutError(self.timeout)),
        };

        match result {
            Ok(execution) => {
                debug!("{} finished in {:?}", name, execution.duration);
                attempt.apply(AttemptEvent::Succeed)?;
            }
            Err(e) if e.is_per_device() => {
                warn!("{} failed: {}", name, e);
                attempt.fail_with(&e)?;
            }
            Err(e @ (DeployError::StateStoreError(_) | DeployError::Internal(_))) => {
                return Err(e);
            }
            Err(e) => {
                // Local trouble (log file, spawn, missing tool) still ends only this attempt
                error!("{} failed on the controller: {}", name, e);
                attempt.fail_with(&e)?;
            }
        }

        self.finish(name, attempt, clock, index, total).await
    }

    async fn finish(
        &self,
        name: &str,
        attempt: DeploymentAttempt,
        clock: Instant,
        index: usize,
        total: usize,
    ) -> Result<DeviceOutcome, DeployError> {
        self.store.record_attempt(name, &attempt).await?;
        let outcome = DeviceOutcome::from_attempt(name, &attempt, clock.elapsed());
        self.reporter.device_finished(&outcome, index + 1, total);
        Ok(outcome)
    }
}
