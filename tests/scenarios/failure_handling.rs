//! Test: Failure Handling - fatal short-circuits and soft failures

use crate::helpers::*;
use dagr_installer::core::ProvisioningContext;
use dagr_installer::execution::SubprocessResult;
use std::sync::Arc;

/// Test that a missing OS manifest stops the run before anything is changed
#[tokio::test]
async fn test_missing_os_manifest_aborts_before_mutation() {
    let sandbox = Sandbox::new();
    std::fs::remove_file(sandbox.source("system-packages.txt")).unwrap();
    let previous = sandbox.installed("src/dagr.py");
    write(&previous, "# previous release\n");

    let runner = Arc::new(RecordingRunner::new());
    let (report, _ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(true)), Default::default())
        .await;

    assert_aborted_by(&report, "preflight");
    assert_eq!(report.executed(), vec!["preflight"]);
    assert!(runner.calls().is_empty());
    assert_eq!(sandbox.boot_config(), BOOT_CONFIG);
    assert_eq!(sandbox.hosts(), HOSTS);
    assert_eq!(read(&previous), "# previous release\n");
}

#[tokio::test]
async fn test_unprivileged_run_aborts() {
    let sandbox = Sandbox::new();
    let ctx = ProvisioningContext::new(sandbox.config.clone(), false, 1000, Some("pi".to_string()));
    let runner = Arc::new(RecordingRunner::new());

    let report = run_with(&ctx, runner.clone(), Arc::new(FixedPrompter::new(true)), no_reboot()).await;

    assert_aborted_by(&report, "preflight");
    assert!(runner.calls().is_empty());
    assert_eq!(sandbox.boot_config(), BOOT_CONFIG);
}

#[tokio::test]
async fn test_missing_service_definition_aborts() {
    let sandbox = Sandbox::new();
    std::fs::remove_file(sandbox.source("dagr.service")).unwrap();

    let (report, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_aborted_by(&report, "preflight");
}

/// Test that a missing entry point is caught before the install root is replaced
#[tokio::test]
async fn test_missing_entry_point_keeps_previous_install() {
    let sandbox = Sandbox::new();
    std::fs::remove_file(sandbox.source("src/dagr.py")).unwrap();
    let previous = sandbox.installed("src/dagr.py");
    write(&previous, "# previous release\n");

    let runner = Arc::new(RecordingRunner::new());
    let (report, _ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    assert_aborted_by(&report, "preflight");
    assert!(runner.calls().is_empty());
    assert_eq!(read(&previous), "# previous release\n");
}

#[tokio::test]
async fn test_missing_boot_config_aborts() {
    let sandbox = Sandbox::new();
    std::fs::remove_file(&sandbox.config.paths.boot_config_candidates[0]).unwrap();

    let (report, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_aborted_by(&report, "preflight");
}

#[tokio::test]
async fn test_legacy_boot_config_location() {
    let sandbox = Sandbox::new();
    let candidates = &sandbox.config.paths.boot_config_candidates;
    std::fs::remove_file(&candidates[0]).unwrap();
    write(&candidates[1], "#dtparam=spi=on\n");

    let (report, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_run_completed(&report);
    let boot = read(&candidates[1]);
    assert_eq!(count_lines(&boot, "dtparam=spi=on"), 1);
    assert_eq!(count_lines(&boot, "dtparam=i2c_arm=on"), 1);
}

/// Test that a package install timeout is a warning and the run carries on
#[tokio::test]
async fn test_package_timeout_is_soft() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("apt-get install", SubprocessResult::timed_out())
            .respond("apt-get update", SubprocessResult::exited(100)),
    );

    let (report, ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    assert_run_completed(&report);
    assert!(runner.ran("systemctl start dagr.service"));

    let warnings = ctx.warnings();
    let from_deps: Vec<_> = warnings
        .iter()
        .filter(|w| w.from_step == "install-os-deps")
        .collect();
    assert_eq!(from_deps.len(), 2);
    assert!(from_deps.iter().any(|w| w.content.contains("timed out")));
}

#[tokio::test]
async fn test_runtime_timeout_is_soft() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(RecordingRunner::new().respond("python3 -m venv", SubprocessResult::timed_out()));

    let (report, ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    assert_run_completed(&report);
    assert!(!runner.ran(&format!(
        "{}/bin/pip",
        sandbox.config.paths.venv_dir().display()
    )));
    assert!(ctx.warnings().iter().any(|w| w.from_step == "setup-runtime"));
}

#[tokio::test]
async fn test_best_effort_failures_are_warnings() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("usermod", SubprocessResult::exited(6))
            .respond("systemctl enable zramswap", SubprocessResult::exited(1))
            .respond("chown", SubprocessResult::exited(1))
            .respond("systemctl start", SubprocessResult::exited(1)),
    );

    let (report, ctx) = sandbox
        .run(runner, Arc::new(FixedPrompter::new(false)), no_reboot())
        .await;

    assert_run_completed(&report);
    let steps: Vec<String> = ctx.warnings().into_iter().map(|w| w.from_step).collect();
    assert_eq!(steps.iter().filter(|s| *s == "enable-interfaces").count(), 3);
    assert!(steps.contains(&"tune-performance".to_string()));
    assert!(steps.contains(&"provision-directories".to_string()));
    assert!(steps.contains(&"install-service".to_string()));
}

#[tokio::test]
async fn test_enable_failure_aborts_service_install() {
    let sandbox = Sandbox::new();
    let runner = Arc::new(
        RecordingRunner::new().respond("systemctl enable dagr.service", SubprocessResult::exited(1)),
    );

    let (report, _ctx) = sandbox
        .run(runner.clone(), Arc::new(FixedPrompter::new(true)), Default::default())
        .await;

    assert_aborted_by(&report, "install-service");
    assert!(!runner.ran("systemctl start dagr.service"));
    assert!(!runner.ran("reboot"));
    // No rollback of earlier work
    assert!(sandbox.installed("src/dagr.py").is_file());
}

#[tokio::test]
async fn test_invalid_app_config_is_copied_with_warning() {
    let sandbox = Sandbox::new();
    write(&sandbox.source("config/config.json"), "{ not json");

    let (report, ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_run_completed(&report);
    assert_eq!(read(&sandbox.installed("config/config.json")), "{ not json");
    assert!(ctx.warnings().iter().any(|w| w.from_step == "install-config"));
}

#[tokio::test]
async fn test_optional_inputs_may_be_absent() {
    let sandbox = Sandbox::new();
    std::fs::remove_dir_all(sandbox.source("scripts")).unwrap();
    std::fs::remove_dir_all(sandbox.source("config")).unwrap();
    std::fs::remove_file(sandbox.source("VERSION")).unwrap();

    let (report, ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_run_completed(&report);
    assert!(ctx.warnings().is_empty());
    assert!(!sandbox.installed("scripts").exists());
    assert!(!sandbox.installed("config/config.json").exists());
}
