//! Attempt lifecycle tests

use uuid::Uuid;

use fleet_deployer::deploy::fsm::{AttemptEvent, AttemptFsm};
use fleet_deployer::errors::DeployError;
use fleet_deployer::state::attempt::{AttemptStatus, DeploymentAttempt};

#[test]
fn test_fsm_initial_state() {
    let fsm = AttemptFsm::new();
    assert_eq!(fsm.status(), AttemptStatus::Pending);
    assert!(!fsm.status().is_terminal());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = AttemptFsm::new();

    // Pending -> Running
    fsm.process(&AttemptEvent::Start).unwrap();
    assert_eq!(fsm.status(), AttemptStatus::Running);

    // Running -> Success
    fsm.process(&AttemptEvent::Succeed).unwrap();
    assert_eq!(fsm.status(), AttemptStatus::Success);
    assert!(fsm.status().is_terminal());
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = AttemptFsm::new();

    fsm.process(&AttemptEvent::Start).unwrap();
    fsm.process(&AttemptEvent::Fail {
        kind: "remote-exit".to_string(),
        summary: "exit 1".to_string(),
    })
    .unwrap();

    assert_eq!(fsm.status(), AttemptStatus::Failed);
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = AttemptFsm::from_status(AttemptStatus::Success);
    assert!(fsm.process(&AttemptEvent::Start).is_err());

    let mut fsm = AttemptFsm::from_status(AttemptStatus::Failed);
    assert!(fsm.process(&AttemptEvent::Succeed).is_err());
    assert_eq!(fsm.status(), AttemptStatus::Failed);
}

#[test]
fn test_fsm_cannot_succeed_without_running() {
    let mut fsm = AttemptFsm::new();
    assert!(fsm.process(&AttemptEvent::Succeed).is_err());
    assert_eq!(fsm.status(), AttemptStatus::Pending);
}

#[test]
fn test_fsm_skip_from_pending() {
    let mut fsm = AttemptFsm::new();
    fsm.process(&AttemptEvent::Skip {
        reason: "excluded by platform filter".to_string(),
    })
    .unwrap();
    assert_eq!(fsm.status(), AttemptStatus::Skipped);
}

#[test]
fn test_attempt_records_failure_before_start() {
    let mut attempt = DeploymentAttempt::new(Uuid::new_v4(), None);
    attempt
        .fail_with(&DeployError::PayloadError("Local script not found".to_string()))
        .unwrap();

    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.error_kind.as_deref(), Some("payload"));
    assert!(attempt.started_at.is_some());
    assert!(attempt.finished_at.is_some());
}

#[test]
fn test_attempt_rejects_second_terminal_event() {
    let mut attempt = DeploymentAttempt::new(Uuid::new_v4(), None);
    attempt.apply(AttemptEvent::Start).unwrap();
    attempt.apply(AttemptEvent::Succeed).unwrap();

    let err = attempt
        .fail_with(&DeployError::ConnectionError("late".into()))
        .unwrap_err();
    assert!(matches!(err, DeployError::Internal(_)));
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert!(attempt.error_summary.is_none());
}
