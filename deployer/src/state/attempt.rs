//! Deployment attempts

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::fsm::{AttemptEvent, AttemptFsm};
use crate::errors::DeployError;

/// Attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Success | AttemptStatus::Failed | AttemptStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Running => "running",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Skipped => "skipped",
        }
    }
}

/// One attempt to deploy one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    /// Unique attempt ID
    pub attempt_id: Uuid,

    /// Run that made the attempt
    pub run_id: Uuid,

    pub status: AttemptStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Error classification, e.g. `timeout`; present iff failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Present iff failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl DeploymentAttempt {
    /// Create a pending attempt for a run
    pub fn new(run_id: Uuid, log_path: Option<PathBuf>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            run_id,
            status: AttemptStatus::Pending,
            started_at: None,
            finished_at: None,
            error_kind: None,
            error_summary: None,
            log_path,
        }
    }

    /// Apply a lifecycle event, stamping times and error text
    pub fn apply(&mut self, event: AttemptEvent) -> Result<(), DeployError> {
        let mut fsm = AttemptFsm::from_status(self.status);
        let status = fsm.process(&event).map_err(DeployError::Internal)?;
        let now = Utc::now();

        match event {
            AttemptEvent::Start => {
                self.started_at = Some(now);
            }
            AttemptEvent::Succeed => {
                self.finished_at = Some(now);
            }
            AttemptEvent::Fail { kind, summary } => {
                self.started_at.get_or_insert(now);
                self.finished_at = Some(now);
                self.error_kind = Some(kind);
                self.error_summary = Some(summary);
            }
            AttemptEvent::Skip { reason } => {
                self.finished_at = Some(now);
                self.error_summary = None;
                tracing::debug!("Attempt {} skipped: {}", self.attempt_id, reason);
            }
        }

        self.status = status;
        Ok(())
    }

    /// Record a failure from an error
    pub fn fail_with(&mut self, error: &DeployError) -> Result<(), DeployError> {
        self.apply(AttemptEvent::Fail {
            kind: error.classification().to_string(),
            summary: error.summary(),
        })
    }
}
