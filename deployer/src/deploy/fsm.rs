//! Finite state machine for a single device attempt

use crate::state::attempt::AttemptStatus;

/// Attempt event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    /// The worker picked the device up
    Start,

    /// Install finished with exit 0
    Succeed,

    /// Install failed; `kind` is the error classification
    Fail { kind: String, summary: String },

    /// Excluded from dispatch
    Skip { reason: String },
}

/// Attempt FSM
#[derive(Debug, Clone)]
pub struct AttemptFsm {
    status: AttemptStatus,
}

impl AttemptFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::from_status(AttemptStatus::Pending)
    }

    pub fn from_status(status: AttemptStatus) -> Self {
        Self { status }
    }

    /// Get current status
    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: &AttemptEvent) -> Result<AttemptStatus, String> {
        let new_status = match (self.status, event) {
            (AttemptStatus::Pending, AttemptEvent::Start) => AttemptStatus::Running,
            (AttemptStatus::Pending, AttemptEvent::Skip { .. }) => AttemptStatus::Skipped,

            // Failures before the executor runs (e.g. no install payload)
            (AttemptStatus::Pending, AttemptEvent::Fail { .. }) => AttemptStatus::Failed,

            (AttemptStatus::Running, AttemptEvent::Succeed) => AttemptStatus::Success,
            (AttemptStatus::Running, AttemptEvent::Fail { .. }) => AttemptStatus::Failed,

            // Terminal states are final; a retry is a new attempt
            (status, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", status, event));
            }
        };

        self.status = new_status;
        Ok(new_status)
    }
}

impl Default for AttemptFsm {
    fn default() -> Self {
        Self::new()
    }
}
