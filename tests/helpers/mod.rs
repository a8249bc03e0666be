//! Test utilities for running the provisioning pipeline in a sandbox

#![allow(dead_code)]

use async_trait::async_trait;
use dagr_installer::core::{ExecutionStatus, InstallerConfig, ProvisioningContext, StepState};
use dagr_installer::execution::{
    CommandRunner, CommandSpec, SequenceReport, StepSequencer, SubprocessResult,
};
use dagr_installer::provision::{build_pipeline, PipelineOptions, Prompter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Command runner that records every command line and answers from a script
///
/// The first scripted prefix matching a command line decides its result;
/// anything unscripted succeeds.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    script: Mutex<Vec<(String, SubprocessResult)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, prefix: &str, result: SubprocessResult) -> Self {
        self.script
            .lock()
            .unwrap()
            .push((prefix.to_string(), result));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first call starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> SubprocessResult {
        let line = spec.command_line();
        self.calls.lock().unwrap().push(line.clone());
        self.script
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, result)| *result)
            .unwrap_or(SubprocessResult::exited(0))
    }
}

/// Prompter with a fixed answer that counts how often it was asked
pub struct FixedPrompter {
    answer: bool,
    asked: AtomicUsize,
}

impl FixedPrompter {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl Prompter for FixedPrompter {
    fn confirm(&self, _question: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

pub const BOOT_CONFIG: &str = "# Raspberry Pi firmware settings\n#dtparam=spi=on\ndtparam=audio=on\n";
pub const HOSTS: &str = "127.0.0.1\tlocalhost\n::1\t\tlocalhost ip6-localhost\n\n127.0.1.1\traspberrypi\n";
pub const APP_CONFIG: &str = r#"{
  "display": {"width": 800, "height": 480},
  "web_server": {"port": 8080},
  "external_api": {"timeout": 10}
}"#;

/// A fake device filesystem: installer inputs under `source/`, system
/// files under `root/`
pub struct Sandbox {
    pub temp: TempDir,
    pub config: InstallerConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let root = temp.path().join("root");

        write(&source.join("src/dagr.py"), "#!/usr/bin/env python3\nprint('dagr')\n");
        write(&source.join("src/display_manager.py"), "class DisplayManager:\n    pass\n");
        write(&source.join("src/dagr_display"), "#!/usr/bin/env python3\nprint('display')\n");
        write(&source.join("src/dagr_update"), "#!/usr/bin/env python3\nprint('update')\n");
        write(&source.join("scripts/spi_reset.sh"), "modprobe -r spidev\nmodprobe spidev\n");
        write(
            &source.join("system-packages.txt"),
            "# display\npython3-pil\npython3-spidev\n\nfonts-dejavu\n",
        );
        write(&source.join("requirements.txt"), "flask==3.0.0\nrequests\n");
        write(&source.join("dagr.service"), "[Unit]\nDescription=Dagr display\n");
        write(&source.join("config/config.json"), APP_CONFIG);
        write(&source.join("VERSION"), "1.4.2\n");

        write(&root.join("boot/firmware/config.txt"), BOOT_CONFIG);
        write(&root.join("etc/hosts"), HOSTS);
        write(&root.join("etc/hostname"), "raspberrypi\n");
        write(&root.join("sys/class/net/lo/address"), "00:00:00:00:00:00\n");
        write(&root.join("sys/class/net/eth0/address"), "aa:bb:cc:11:22:33\n");
        write(&root.join("sys/class/net/eth0/ifindex"), "2\n");
        write(&root.join("sys/class/net/eth0/device/uevent"), "DRIVER=lan78xx\n");
        // Bridge with a random address, sorts before eth0 by name
        write(&root.join("sys/class/net/docker0/address"), "02:42:9f:3c:77:01\n");
        write(&root.join("sys/class/net/docker0/ifindex"), "5\n");

        let mut config = InstallerConfig::default();
        config.poll_interval_ms = 10;
        let paths = &mut config.paths;
        paths.source_root = source;
        paths.install_root = root.join("usr/local/dagr");
        paths.launcher = root.join("usr/local/bin/dagr");
        paths.unit_dir = root.join("etc/systemd/system");
        paths.boot_config_candidates = vec![
            root.join("boot/firmware/config.txt"),
            root.join("boot/config.txt"),
        ];
        paths.hosts_file = root.join("etc/hosts");
        paths.hostname_file = root.join("etc/hostname");
        paths.net_class_dir = root.join("sys/class/net");

        Self { temp, config }
    }

    pub fn source(&self, relative: &str) -> PathBuf {
        self.config.paths.source_root.join(relative)
    }

    pub fn installed(&self, relative: &str) -> PathBuf {
        self.config.paths.install_root.join(relative)
    }

    pub fn boot_config(&self) -> String {
        read(&self.config.paths.boot_config_candidates[0])
    }

    pub fn hosts(&self) -> String {
        read(&self.config.paths.hosts_file)
    }

    /// Context as root, invoked through sudo by `pi`
    pub fn context(&self) -> ProvisioningContext {
        ProvisioningContext::new(self.config.clone(), false, 0, Some("pi".to_string()))
    }

    /// Run the whole pipeline
    pub async fn run(
        &self,
        runner: Arc<RecordingRunner>,
        prompter: Arc<FixedPrompter>,
        options: PipelineOptions,
    ) -> (SequenceReport, ProvisioningContext) {
        let ctx = self.context();
        let report = run_with(&ctx, runner, prompter, options).await;
        (report, ctx)
    }
}

pub async fn run_with(
    ctx: &ProvisioningContext,
    runner: Arc<RecordingRunner>,
    prompter: Arc<FixedPrompter>,
    options: PipelineOptions,
) -> SequenceReport {
    let steps = build_pipeline(runner, prompter, options);
    StepSequencer::new().run(steps, ctx).await
}

pub fn no_reboot() -> PipelineOptions {
    PipelineOptions {
        offer_reboot: false,
    }
}

pub fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// Assert the run completed
pub fn assert_run_completed(report: &SequenceReport) {
    assert_eq!(
        report.status,
        ExecutionStatus::Completed,
        "run did not complete: {:?}",
        report.fatal_failure()
    );
    assert_eq!(report.exit_code(), 0);
}

/// Assert the run was aborted by `step`
pub fn assert_aborted_by(report: &SequenceReport, step: &str) {
    assert_eq!(report.status, ExecutionStatus::Aborted);
    assert_eq!(report.exit_code(), 1);
    let failed = report.fatal_failure().expect("no fatal failure recorded");
    assert_eq!(failed.name, step);

    let index = report.steps.iter().position(|s| s.name == step).unwrap();
    for later in &report.steps[index + 1..] {
        assert!(
            matches!(later.state, StepState::Skipped { .. }),
            "{} was not skipped",
            later.name
        );
    }
}

/// Count lines of `content` equal to `line`
pub fn count_lines(content: &str, line: &str) -> usize {
    content.lines().filter(|l| l.trim() == line).count()
}
