//! Test: Ordering - steps touch the system in the required sequence

use crate::helpers::*;
use dagr_installer::execution::SubprocessResult;
use std::sync::Arc;

#[tokio::test]
async fn test_service_stopped_before_tree_replaced() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(RecordingRunner::new());

    let (report, _ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;
    assert_run_completed(&report);

    let stop = runner.position("systemctl stop dagr.service").unwrap();
    let chown = runner.position("chown -R").unwrap();
    let enable = runner.position("systemctl enable dagr.service").unwrap();
    let start = runner.position("systemctl start dagr.service").unwrap();
    assert!(stop < chown);
    assert!(chown < enable);
    assert!(enable < start);
}

#[tokio::test]
async fn test_identity_set_before_dependencies() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(RecordingRunner::new());

    sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    let hostname = runner.position("hostname ").unwrap();
    let update = runner.position("apt-get update").unwrap();
    let install = runner.position("apt-get install").unwrap();
    assert!(hostname < update);
    assert!(update < install);
}

#[tokio::test]
async fn test_stop_timeout_does_not_block_provisioning() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(
        RecordingRunner::new().respond("systemctl stop", SubprocessResult::timed_out()),
    );

    let (report, ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    assert_run_completed(&report);
    assert!(runner.ran("chown -R"));
    assert!(ctx
        .warnings()
        .iter()
        .any(|w| w.from_step == "stop-service"));
}

#[tokio::test]
async fn test_inactive_service_is_not_stopped() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(
        RecordingRunner::new().respond("systemctl is-active", SubprocessResult::exited(3)),
    );

    let (report, _ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    assert_run_completed(&report);
    assert!(!runner.ran("systemctl stop"));
    assert!(runner.ran("systemctl start dagr.service"));
}

#[tokio::test]
async fn test_report_lists_steps_in_order() {
    let sandbox = Sandbox::new();
    let (report, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_eq!(
        report.executed(),
        vec![
            "preflight",
            "stop-service",
            "enable-interfaces",
            "set-identity",
            "install-os-deps",
            "tune-performance",
            "provision-directories",
            "setup-runtime",
            "install-executable",
            "install-config",
            "install-service",
            "finish"
        ]
    );
}
