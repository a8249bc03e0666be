//! Test: Idempotency - a second run converges to the same state

use crate::helpers::*;
use std::sync::Arc;

#[tokio::test]
async fn test_second_run_is_clean() {
    let sandbox = Sandbox::new();

    let (first, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;
    assert_run_completed(&first);
    let boot_after_first = sandbox.boot_config();
    let hosts_after_first = sandbox.hosts();

    let (second, ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;
    assert_run_completed(&second);
    assert!(ctx.warnings().is_empty(), "{}", ctx.format_warnings());

    assert_eq!(sandbox.boot_config(), boot_after_first);
    assert_eq!(sandbox.hosts(), hosts_after_first);
    assert_eq!(count_lines(&sandbox.boot_config(), "dtparam=spi=on"), 1);
    assert_eq!(count_lines(&sandbox.boot_config(), "dtparam=i2c_arm=on"), 1);
    assert_eq!(
        sandbox
            .hosts()
            .lines()
            .filter(|l| l.starts_with("127.0.1.1"))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_stale_files_removed_on_reinstall() {
    let sandbox = Sandbox::new();
    let stale = sandbox.installed("src/removed_module.py");
    write(&stale, "old = True\n");
    write(&sandbox.installed("src/dagr.py"), "local edit\n");

    let (report, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_run_completed(&report);
    assert!(!stale.exists());
    assert!(read(&sandbox.installed("src/dagr.py")).contains("print('dagr')"));
}

#[tokio::test]
async fn test_duplicate_directives_collapse() {
    let sandbox = Sandbox::new();
    write(
        &sandbox.config.paths.boot_config_candidates[0],
        "dtparam=spi=off\n#dtparam=spi=on\ndtparam=spi=on\n# dtparam=i2c_arm=on\n",
    );

    let (report, _ctx) = sandbox
        .run(
            Arc::new(RecordingRunner::new()),
            Arc::new(FixedPrompter::new(false)),
            no_reboot(),
        )
        .await;

    assert_run_completed(&report);
    let boot = sandbox.boot_config();
    assert_eq!(
        boot.lines().filter(|l| l.contains("dtparam=spi")).count(),
        1
    );
    assert_eq!(count_lines(&boot, "dtparam=spi=on"), 1);
    assert_eq!(count_lines(&boot, "dtparam=i2c_arm=on"), 1);
}
