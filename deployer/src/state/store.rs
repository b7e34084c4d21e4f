//! Deployment state store
//!
//! The JSON state file maps each device to its latest attempt and keeps every
//! prior attempt for audit. All mutation goes through one async mutex so
//! concurrent workers never race on the file, and every write is a
//! write-then-rename so a crash leaves either the old or the new file.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::inventory::device::{DeviceRecord, Platform};
use crate::state::attempt::{AttemptStatus, DeploymentAttempt};

/// Which devices a run dispatches, relative to recorded state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// Every device, ignoring recorded state
    #[default]
    All,

    /// Everything whose latest attempt is not a success
    Resume,

    /// Only devices whose latest attempt failed
    RetryFailed,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchMode::All => "all",
            DispatchMode::Resume => "resume",
            DispatchMode::RetryFailed => "retry-failed",
        })
    }
}

/// Filters a run was started with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFilter {
    pub mode: DispatchMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// Metadata of the most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub filter: RunFilter,
}

impl RunMetadata {
    pub fn new(filter: RunFilter) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            filter,
        }
    }
}

/// Persisted deployment state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunMetadata>,

    /// Latest attempt per device
    #[serde(default)]
    pub latest: BTreeMap<String, DeploymentAttempt>,

    /// Every attempt per device, oldest first
    #[serde(default)]
    pub history: BTreeMap<String, Vec<DeploymentAttempt>>,
}

impl DeploymentState {
    /// Status of the device's latest attempt
    pub fn latest_status(&self, device_name: &str) -> Option<AttemptStatus> {
        self.latest.get(device_name).map(|a| a.status)
    }

    /// All attempts for a device, oldest first
    pub fn history(&self, device_name: &str) -> &[DeploymentAttempt] {
        self.history
            .get(device_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `mode` selects the device for dispatch
    pub fn selects(&self, device_name: &str, mode: DispatchMode) -> bool {
        match mode {
            DispatchMode::All => true,
            DispatchMode::Resume => self.latest_status(device_name) != Some(AttemptStatus::Success),
            DispatchMode::RetryFailed => {
                self.latest_status(device_name) == Some(AttemptStatus::Failed)
            }
        }
    }

    /// Ordered subset of `devices` selected by `mode`
    pub fn pending_for(
        &self,
        devices: &[Arc<DeviceRecord>],
        mode: DispatchMode,
    ) -> Vec<Arc<DeviceRecord>> {
        devices
            .iter()
            .filter(|d| self.selects(&d.device_name, mode))
            .cloned()
            .collect()
    }

    /// Insert or update an attempt. An attempt with a known ID replaces its
    /// earlier snapshot; a new ID is appended to the history.
    pub fn upsert(&mut self, device_name: &str, attempt: &DeploymentAttempt) {
        let history = self.history.entry(device_name.to_string()).or_default();
        match history
            .iter_mut()
            .find(|a| a.attempt_id == attempt.attempt_id)
        {
            Some(existing) => *existing = attempt.clone(),
            None => history.push(attempt.clone()),
        }
        self.latest.insert(device_name.to_string(), attempt.clone());
    }

    /// Parse state file contents, accepting the flat legacy layout
    /// `{ "<device>": { "status", "timestamp", "error" } }`.
    pub fn from_json(contents: &str) -> Result<Self, DeployError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let value: serde_json::Value = serde_json::from_str(contents)?;
        let is_current = value.as_object().is_some_and(|map| {
            map.is_empty() || ["run", "latest", "history"].iter().any(|k| map.contains_key(*k))
        });
        if is_current {
            return Ok(serde_json::from_value(value)?);
        }

        let legacy: BTreeMap<String, LegacyEntry> = serde_json::from_value(value)?;
        let mut state = Self::default();
        for (device_name, entry) in legacy {
            state.upsert(&device_name, &entry.into_attempt());
        }
        info!("Imported {} devices from legacy state layout", state.latest.len());
        Ok(state)
    }
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    status: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl LegacyEntry {
    fn into_attempt(self) -> DeploymentAttempt {
        let finished_at = self.timestamp.as_deref().and_then(parse_legacy_timestamp);
        let status = match self.status.as_str() {
            "success" => AttemptStatus::Success,
            "failed" => AttemptStatus::Failed,
            "running" => AttemptStatus::Running,
            "skipped" => AttemptStatus::Skipped,
            _ => AttemptStatus::Pending,
        };
        let failed = status == AttemptStatus::Failed;
        DeploymentAttempt {
            attempt_id: Uuid::new_v4(),
            run_id: Uuid::nil(),
            status,
            started_at: finished_at,
            finished_at,
            error_kind: failed.then(|| "legacy".to_string()),
            error_summary: if failed {
                Some(self.error.unwrap_or_else(|| "unknown error".to_string()))
            } else {
                None
            },
            log_path: None,
        }
    }
}

fn parse_legacy_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

/// Single-writer store in front of the state file
pub struct StateStore {
    file: File,
    state: Mutex<DeploymentState>,
}

impl StateStore {
    /// Open the store, loading the state file if it exists
    pub async fn open(file: File) -> Result<Self, DeployError> {
        let state = if file.exists().await {
            let contents = file.read_string().await.map_err(|e| {
                DeployError::StateStoreError(format!(
                    "cannot read {}: {}",
                    file.path().display(),
                    e
                ))
            })?;
            DeploymentState::from_json(&contents).map_err(|e| {
                DeployError::StateStoreError(format!(
                    "{} is not a valid state file ({}); fix or move it aside",
                    file.path().display(),
                    e
                ))
            })?
        } else {
            debug!("No state file at {}, starting empty", file.path().display());
            DeploymentState::default()
        };

        Ok(Self {
            file,
            state: Mutex::new(state),
        })
    }

    /// Snapshot of the current state
    pub async fn load(&self) -> DeploymentState {
        self.state.lock().await.clone()
    }

    /// Ordered subset of `devices` selected by `mode`
    pub async fn pending_for(
        &self,
        devices: &[Arc<DeviceRecord>],
        mode: DispatchMode,
    ) -> Vec<Arc<DeviceRecord>> {
        self.state.lock().await.pending_for(devices, mode)
    }

    /// Latest attempt for a device
    pub async fn latest(&self, device_name: &str) -> Option<DeploymentAttempt> {
        self.state.lock().await.latest.get(device_name).cloned()
    }

    /// Every attempt for a device, oldest first
    pub async fn history(&self, device_name: &str) -> Vec<DeploymentAttempt> {
        self.state.lock().await.history(device_name).to_vec()
    }

    /// Record the metadata of a starting run
    pub async fn begin_run(&self, run: RunMetadata) -> Result<(), DeployError> {
        self.mutate(|state| state.run = Some(run)).await
    }

    /// Atomically upsert an attempt; durable before returning
    pub async fn record_attempt(
        &self,
        device_name: &str,
        attempt: &DeploymentAttempt,
    ) -> Result<(), DeployError> {
        debug!(
            "Recording attempt {} for {}: {}",
            attempt.attempt_id,
            device_name,
            attempt.status.as_str()
        );
        self.mutate(|state| state.upsert(device_name, attempt)).await
    }

    /// Apply a change, persist it, and only then publish it in memory
    async fn mutate<F>(&self, change: F) -> Result<(), DeployError>
    where
        F: FnOnce(&mut DeploymentState),
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        change(&mut next);

        if let Err(e) = self.file.write_json(&next).await {
            warn!("Failed to persist {}: {}", self.file.path().display(), e);
            return Err(DeployError::StateStoreError(format!(
                "cannot write {}: {}",
                self.file.path().display(),
                e
            )));
        }

        *guard = next;
        Ok(())
    }
}
