//! Subprocess supervisor - bounded execution of external commands
//!
//! Every external command the installer runs goes through here. The child is
//! spawned in its own process group and watched by a timer-driven loop that
//! renders a progress glyph. When the poll count reaches the timeout the whole
//! group is killed and a timed-out result is returned. Nothing in this module
//! returns an error: callers get a [`SubprocessResult`] and decide severity.

use crate::cli::output::{create_spinner, CHECK, CROSS, WARN};
use async_trait::async_trait;
use console::style;
use indicatif::ProgressBar;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Exit code reported when the supervisor killed the command
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the command could not be started
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// How much of the child's output reaches the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Discard stdout and stderr, show only the progress line
    #[default]
    Quiet,
    /// Stream stdout and stderr above the progress line
    Verbose,
}

/// An external command with its description and time budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Human-readable description shown next to the progress glyph
    pub description: String,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, description: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            description: description.into(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command line as a single string
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a supervised command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubprocessResult {
    pub exit_code: i32,
    pub timed_out: bool,
}

impl SubprocessResult {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs external commands
///
/// The seam between steps and the operating system, so pipelines can run
/// against a recording runner in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> SubprocessResult;
}

/// Supervises subprocesses with a progress glyph and a hard timeout
#[derive(Debug, Clone)]
pub struct SubprocessSupervisor {
    mode: OutputMode,
    poll_interval: Duration,
    show_progress: bool,
}

impl SubprocessSupervisor {
    pub fn new(mode: OutputMode, poll_interval: Duration) -> Self {
        Self {
            mode,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            show_progress: true,
        }
    }

    /// Disable the progress line and status glyphs
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Number of polls that make up `timeout`, at least one
    fn max_polls(&self, timeout: Duration) -> u128 {
        let interval = self.poll_interval.as_millis().max(1);
        timeout.as_millis().div_ceil(interval).max(1)
    }

    fn progress_bar(&self, description: &str) -> ProgressBar {
        if self.show_progress {
            create_spinner(description)
        } else {
            ProgressBar::hidden()
        }
    }

    fn report(&self, bar: &ProgressBar, spec: &CommandSpec, result: &SubprocessResult) {
        bar.finish_and_clear();
        if !self.show_progress {
            return;
        }
        if result.timed_out {
            println!(
                "{} {} {}",
                WARN,
                spec.description,
                style(format!("(timed out after {}s)", spec.timeout.as_secs())).yellow()
            );
        } else if result.success() {
            println!("{} {}", CHECK, spec.description);
        } else {
            println!(
                "{} {} {}",
                CROSS,
                spec.description,
                style(format!("(exit code {})", result.exit_code)).red()
            );
        }
    }

    fn spawn(&self, spec: &CommandSpec) -> std::io::Result<Child> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);

        match self.mode {
            OutputMode::Quiet => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
            OutputMode::Verbose => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        command.spawn()
    }

    /// Run a command to completion or until its timeout
    pub async fn supervise(&self, spec: &CommandSpec) -> SubprocessResult {
        debug!(
            "Running '{}' (timeout {}s): {}",
            spec.description,
            spec.timeout.as_secs(),
            spec.command_line()
        );

        let bar = self.progress_bar(&spec.description);

        let mut child = match self.spawn(spec) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", spec.program, e);
                let result = SubprocessResult::exited(SPAWN_FAILURE_EXIT_CODE);
                self.report(&bar, spec, &result);
                return result;
            }
        };

        let forwarders = forward_output(&mut child, &bar);
        let max_polls = self.max_polls(spec.timeout);
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u128 = 0;

        let result = loop {
            tokio::select! {
                status = child.wait() => {
                    break match status {
                        Ok(status) => SubprocessResult::exited(exit_code_of(status)),
                        Err(e) => {
                            warn!("Failed to wait for {}: {}", spec.program, e);
                            SubprocessResult::exited(-1)
                        }
                    };
                }
                _ = ticker.tick() => {
                    polls += 1;
                    if polls >= max_polls {
                        warn!(
                            "{} exceeded its {}s timeout, terminating",
                            spec.description,
                            spec.timeout.as_secs()
                        );
                        terminate(&mut child).await;
                        break SubprocessResult::timed_out();
                    }
                    bar.tick();
                }
            }
        };

        // Pipes close once the process group is gone
        join_forwarders(forwarders, FORWARDER_GRACE).await;

        debug!(
            "'{}' finished: exit code {}, timed out: {}",
            spec.description, result.exit_code, result.timed_out
        );
        self.report(&bar, spec, &result);
        result
    }
}

#[async_trait]
impl CommandRunner for SubprocessSupervisor {
    async fn run(&self, spec: &CommandSpec) -> SubprocessResult {
        self.supervise(spec).await
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Kill the child's whole process group, then reap the child
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // The child leads its own group (process_group(0) at spawn)
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            debug!("killpg({}) failed: {}", pid, std::io::Error::last_os_error());
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// How long output forwarders may keep draining after the child is gone
const FORWARDER_GRACE: Duration = Duration::from_secs(1);

/// Wait for each forwarder up to `grace`, aborting the ones still running.
/// A descendant that escaped the process group can hold a pipe open forever.
/// Returns how many were aborted.
async fn join_forwarders(forwarders: Vec<JoinHandle<()>>, grace: Duration) -> usize {
    let mut aborted = 0;
    for mut handle in forwarders {
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            handle.abort();
            aborted += 1;
        }
    }
    if aborted > 0 {
        debug!("Aborted {} output forwarder(s) still attached to open pipes", aborted);
    }
    aborted
}

/// Stream piped stdout/stderr lines above the progress line
fn forward_output(child: &mut Child, bar: &ProgressBar) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        handles.push(spawn_forwarder(stdout, bar.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        handles.push(spawn_forwarder(stderr, bar.clone()));
    }
    handles
}

fn spawn_forwarder<R>(reader: R, bar: ProgressBar) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if bar.is_hidden() {
                println!("    {}", style(&line).dim());
            } else {
                bar.println(format!("    {}", style(&line).dim()));
            }
        }
    })
}
