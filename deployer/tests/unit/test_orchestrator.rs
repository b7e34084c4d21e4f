//! Orchestrator integration tests

#[path = "common.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;

use common::{devices, open_store, orchestrator, Behaviour, MockExecutor};
use fleet_deployer::deploy::orchestrator::{DeployRequest, SkipReason};
use fleet_deployer::errors::DeployError;
use fleet_deployer::inventory::device::Platform;
use fleet_deployer::state::attempt::AttemptStatus;
use fleet_deployer::state::store::DispatchMode;

const SHORT: Duration = Duration::from_millis(20);
const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_all_devices_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("rpi-001", "raspberrypi"), ("radxa-001", "radxa"), ("mac-001", "macos")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let summary = assert_ok!(orch.deploy(&fleet, &DeployRequest::default()).await);

    assert_eq!(summary.succeeded(), 3);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.skipped(), 0);
    assert!(summary.is_success());
    assert!(summary.run_id.is_some());
    for device in &fleet {
        let latest = store.latest(&device.device_name).await.unwrap();
        assert_eq!(latest.status, AttemptStatus::Success);
        assert!(latest.started_at.is_some());
        assert!(latest.finished_at >= latest.started_at);
        assert!(latest.error_summary.is_none());
    }
}

#[tokio::test]
async fn test_concurrency_limit_is_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (1..=12).map(|i| format!("rpi-{:03}", i)).collect();
    let rows: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "raspberrypi")).collect();
    let fleet = devices(&rows);

    let executor = Arc::new(MockExecutor::new(Duration::from_millis(50)));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store, dir.path(), TIMEOUT);

    let request = DeployRequest {
        concurrency_limit: 3,
        ..Default::default()
    };
    let summary = orch.deploy(&fleet, &request).await.unwrap();

    assert_eq!(summary.succeeded(), 12);
    assert_eq!(executor.sessions(), 12);
    assert!(executor.peak() <= 3, "peak was {}", executor.peak());
    assert!(executor.peak() >= 2, "workers never overlapped");
}

#[tokio::test]
async fn test_devices_start_in_inventory_order() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("a", "radxa"), ("b", "radxa"), ("c", "radxa"), ("d", "radxa")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store, dir.path(), TIMEOUT);

    let request = DeployRequest {
        concurrency_limit: 1,
        ..Default::default()
    };
    orch.deploy(&fleet, &request).await.unwrap();

    assert_eq!(executor.started(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_timeout_only_fails_that_device() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("rpi-001", "raspberrypi"), ("rpi-002", "raspberrypi"), ("rpi-003", "raspberrypi")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("rpi-002", Behaviour::Hang);
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), Duration::from_millis(300));

    let summary = orch.deploy(&fleet, &DeployRequest::default()).await.unwrap();

    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    let failed = summary.failures().next().unwrap();
    assert_eq!(failed.device_name, "rpi-002");
    assert_eq!(failed.error_kind.as_deref(), Some("timeout"));

    let latest = store.latest("rpi-002").await.unwrap();
    assert_eq!(latest.status, AttemptStatus::Failed);
    assert_eq!(latest.error_kind.as_deref(), Some("timeout"));
    assert!(latest.error_summary.unwrap().contains("Timed out"));
    assert_eq!(
        store.latest("rpi-003").await.unwrap().status,
        AttemptStatus::Success
    );
}

#[tokio::test]
async fn test_remote_failures_are_recorded_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("rpi-001", "raspberrypi"), ("rpi-002", "raspberrypi")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("rpi-001", Behaviour::Exit(1, "E: Unable to locate package zabbix-agent2"));
    executor.set("rpi-002", Behaviour::Unreachable);
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let summary = orch.deploy(&fleet, &DeployRequest::default()).await.unwrap();

    assert_eq!(summary.failed(), 2);
    assert!(!summary.is_success());

    let first = store.latest("rpi-001").await.unwrap();
    assert_eq!(first.error_kind.as_deref(), Some("remote-exit"));
    assert!(first
        .error_summary
        .unwrap()
        .contains("Unable to locate package"));

    let second = store.latest("rpi-002").await.unwrap();
    assert_eq!(second.error_kind.as_deref(), Some("connection"));
}

#[tokio::test]
async fn test_platform_filter_skips_other_platforms() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("rpi-001", "raspberrypi"), ("radxa-001", "radxa"), ("mac-001", "macos")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let request = DeployRequest {
        platform_filter: Some(Platform::Radxa),
        ..Default::default()
    };
    let summary = orch.deploy(&fleet, &request).await.unwrap();

    assert_eq!(summary.planned, vec!["radxa-001"]);
    assert_eq!(summary.attempted(), 1);
    assert_eq!(summary.skipped(), 2);
    assert!(summary
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::PlatformFilter));
    assert_eq!(executor.started(), vec!["radxa-001"]);
    assert!(store.latest("rpi-001").await.is_none());
}

#[tokio::test]
async fn test_second_resume_run_dispatches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("a", "radxa"), ("b", "macos")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let request = DeployRequest {
        mode: DispatchMode::Resume,
        ..Default::default()
    };
    let first = orch.deploy(&fleet, &request).await.unwrap();
    assert_eq!(first.succeeded(), 2);

    let second = orch.deploy(&fleet, &request).await.unwrap();
    assert_eq!(second.attempted(), 0);
    assert_eq!(second.skipped(), 2);
    assert!(second
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::AlreadySucceeded));
    assert_eq!(executor.sessions(), 2);
}

#[tokio::test]
async fn test_resume_survives_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let fleet = devices(&[("a", "radxa"), ("b", "radxa")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("b", Behaviour::Exit(2, "boom"));

    let orch = orchestrator(executor.clone(), open_store(&state_path).await, dir.path(), TIMEOUT);
    orch.deploy(&fleet, &DeployRequest::default()).await.unwrap();

    executor.set("b", Behaviour::Succeed);
    let orch = orchestrator(executor.clone(), open_store(&state_path).await, dir.path(), TIMEOUT);
    let request = DeployRequest {
        mode: DispatchMode::Resume,
        ..Default::default()
    };
    let summary = orch.deploy(&fleet, &request).await.unwrap();

    assert_eq!(summary.planned, vec!["b"]);
    assert_eq!(summary.succeeded(), 1);
}

#[tokio::test]
async fn test_retry_failed_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("rpi-001", "raspberrypi"), ("rpi-002", "raspberrypi"), ("rpi-003", "raspberrypi")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("rpi-002", Behaviour::Exit(1, "exit 1"));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let first = orch.deploy(&fleet, &DeployRequest::default()).await.unwrap();
    assert_eq!(first.failed(), 1);

    executor.set("rpi-002", Behaviour::Succeed);
    let request = DeployRequest {
        mode: DispatchMode::RetryFailed,
        ..Default::default()
    };
    let retry = orch.deploy(&fleet, &request).await.unwrap();

    assert_eq!(retry.planned, vec!["rpi-002"]);
    assert_eq!(retry.succeeded(), 1);

    let history = store.history("rpi-002").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, AttemptStatus::Failed);
    assert_eq!(history[0].error_summary.as_deref(), Some("[remote-exit] Remote execution failed (exit 1): exit 1"));
    assert_eq!(history[1].status, AttemptStatus::Success);
    assert_ne!(history[0].run_id, history[1].run_id);
    assert_eq!(
        store.latest("rpi-002").await.unwrap().status,
        AttemptStatus::Success
    );
}

#[tokio::test]
async fn test_dry_run_writes_nothing_and_opens_no_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let fleet = devices(&[("a", "radxa"), ("b", "macos")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("b", Behaviour::Exit(1, "nope"));

    let store = open_store(&state_path).await;
    let orch = orchestrator(executor.clone(), store, dir.path(), TIMEOUT);
    orch.deploy(&fleet, &DeployRequest::default()).await.unwrap();
    let before = std::fs::read(&state_path).unwrap();
    let sessions = executor.sessions();

    let store = open_store(&state_path).await;
    let orch = orchestrator(executor.clone(), store, dir.path(), TIMEOUT);
    let request = DeployRequest {
        dry_run: true,
        ..Default::default()
    };
    let summary = orch.deploy(&fleet, &request).await.unwrap();

    assert!(summary.dry_run);
    assert!(summary.run_id.is_none());
    assert_eq!(summary.planned, vec!["a", "b"]);
    assert_eq!(summary.attempted(), 0);
    assert_eq!(executor.sessions(), sessions);
    assert_eq!(std::fs::read(&state_path).unwrap(), before);
}

#[tokio::test]
async fn test_abort_drains_in_flight_devices() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("a", "radxa"), ("b", "radxa"), ("c", "radxa"), ("d", "radxa")]);
    let executor = Arc::new(MockExecutor::new(Duration::from_millis(300)));
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let request = DeployRequest {
        concurrency_limit: 2,
        ..Default::default()
    };
    let abort = tokio::time::sleep(Duration::from_millis(100));
    let summary = orch.deploy_until(&fleet, &request, abort).await.unwrap();

    assert!(summary.aborted);
    assert!(!summary.is_success());
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.skipped(), 2);
    assert!(summary.skipped.iter().all(|s| s.reason == SkipReason::Aborted));
    assert_eq!(store.latest("a").await.unwrap().status, AttemptStatus::Success);
    assert!(store.latest("c").await.is_none());
}

#[tokio::test]
async fn test_state_store_failure_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let fleet = devices(&[("a", "radxa")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    let store = open_store(&blocker.join("state.json")).await;
    let orch = orchestrator(executor.clone(), store, dir.path(), TIMEOUT);

    let err = orch.deploy(&fleet, &DeployRequest::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::StateStoreError(_)));
    assert_eq!(executor.sessions(), 0);
}

#[tokio::test]
async fn test_local_fault_fails_only_that_device() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("a", "radxa"), ("b", "radxa")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("a", Behaviour::LocalFault);
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let summary = orch.deploy(&fleet, &DeployRequest::default()).await.unwrap();

    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.succeeded(), 1);
    let attempt = store.latest("a").await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.error_kind.as_deref(), Some("io"));
}

#[tokio::test]
async fn test_internal_executor_error_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = devices(&[("a", "radxa")]);
    let executor = Arc::new(MockExecutor::new(SHORT));
    executor.set("a", Behaviour::Crash);
    let store = open_store(&dir.path().join("state.json")).await;
    let orch = orchestrator(executor.clone(), store.clone(), dir.path(), TIMEOUT);

    let err = orch.deploy(&fleet, &DeployRequest::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::Internal(_)));
    assert_eq!(store.latest("a").await.unwrap().status, AttemptStatus::Running);
}
