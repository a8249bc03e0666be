//! Service lifecycle: stop, install, enable and start one systemd unit

use crate::core::{InstallerConfig, ProvisionError};
use crate::execution::{CommandRunner, CommandSpec, SubprocessResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of the unit as far as this run knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceState {
    Absent,
    Installed,
    Enabled,
    Active,
}

/// The single service unit managed by the installer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    /// Unit name without the `.service` suffix
    pub name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub state: ServiceState,
}

impl ServiceUnit {
    pub fn from_config(config: &InstallerConfig) -> Self {
        let unit_file = format!("{}.service", config.service_name);
        let target_path = config.paths.unit_dir.join(&unit_file);
        let state = if target_path.exists() {
            ServiceState::Installed
        } else {
            ServiceState::Absent
        };
        Self {
            name: config.service_name.clone(),
            source_path: config.paths.service_source_path(),
            target_path,
            state,
        }
    }

    /// Full unit name as systemctl knows it
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.name)
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    TimedOut,
    Failed(i32),
}

/// Drives one unit through stop, install/enable and start
pub struct ServiceLifecycleManager<'a> {
    runner: &'a dyn CommandRunner,
    unit: ServiceUnit,
    stop_timeout: Duration,
    command_timeout: Duration,
}

impl<'a> ServiceLifecycleManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &InstallerConfig) -> Self {
        Self {
            runner,
            unit: ServiceUnit::from_config(config),
            stop_timeout: config.timeouts.service_stop(),
            command_timeout: config.timeouts.command(),
        }
    }

    pub fn unit(&self) -> &ServiceUnit {
        &self.unit
    }

    fn systemctl(&self, verb: &str, description: String, timeout: Duration) -> CommandSpec {
        CommandSpec::new("systemctl", description, timeout)
            .arg(verb)
            .arg(self.unit.unit_name())
    }

    /// Whether the unit is currently active
    pub async fn is_active(&self) -> bool {
        let spec = CommandSpec::new(
            "systemctl",
            format!("Checking whether {} is running", self.unit.unit_name()),
            self.stop_timeout,
        )
        .args(["is-active", "--quiet"])
        .arg(self.unit.unit_name());
        self.runner.run(&spec).await.success()
    }

    /// Whether the unit is enabled for future boots
    pub async fn is_enabled(&self) -> bool {
        let spec = CommandSpec::new(
            "systemctl",
            format!("Checking whether {} is enabled", self.unit.unit_name()),
            self.stop_timeout,
        )
        .args(["is-enabled", "--quiet"])
        .arg(self.unit.unit_name());
        self.runner.run(&spec).await.success()
    }

    /// Stop the unit if it is running
    ///
    /// Never fails: a stop that times out is logged and the caller carries on,
    /// since the unit is about to be replaced anyway.
    pub async fn stop(&mut self) -> StopOutcome {
        if !self.is_active().await {
            debug!("{} is not running", self.unit.unit_name());
            return StopOutcome::NotRunning;
        }
        self.unit.state = ServiceState::Active;

        let spec = self.systemctl(
            "stop",
            format!("Stopping {}", self.unit.unit_name()),
            self.stop_timeout,
        );
        let result = self.runner.run(&spec).await;

        if result.timed_out {
            warn!(
                "Stopping {} timed out after {}s, continuing",
                self.unit.unit_name(),
                self.stop_timeout.as_secs()
            );
            StopOutcome::TimedOut
        } else if result.success() {
            self.unit.state = if self.unit.target_path.exists() {
                ServiceState::Installed
            } else {
                ServiceState::Absent
            };
            info!("Stopped {}", self.unit.unit_name());
            StopOutcome::Stopped
        } else {
            warn!(
                "Stopping {} failed with exit code {}",
                self.unit.unit_name(),
                result.exit_code
            );
            StopOutcome::Failed(result.exit_code)
        }
    }

    /// Copy the unit definition into place, reload systemd and enable it
    ///
    /// Does not start the unit.
    pub async fn install_and_enable(&mut self) -> Result<(), ProvisionError> {
        if !self.unit.source_path.is_file() {
            return Err(ProvisionError::missing(
                "service definition",
                &self.unit.source_path,
            ));
        }

        if let Some(parent) = self.unit.target_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }
        std::fs::copy(&self.unit.source_path, &self.unit.target_path)
            .map_err(|e| ProvisionError::io(&self.unit.target_path, e))?;
        self.unit.state = ServiceState::Installed;
        debug!(
            "Installed {} to {}",
            self.unit.source_path.display(),
            self.unit.target_path.display()
        );

        let reload = CommandSpec::new(
            "systemctl",
            "Reloading systemd unit index",
            self.command_timeout,
        )
        .arg("daemon-reload");
        check(&reload, self.runner.run(&reload).await)?;

        let enable = self.systemctl(
            "enable",
            format!("Enabling {}", self.unit.unit_name()),
            self.command_timeout,
        );
        check(&enable, self.runner.run(&enable).await)?;
        self.unit.state = ServiceState::Enabled;

        info!("{} installed and enabled", self.unit.unit_name());
        Ok(())
    }

    /// Start the unit; the result is the caller's to report
    pub async fn start(&mut self) -> SubprocessResult {
        let spec = self.systemctl(
            "start",
            format!("Starting {}", self.unit.unit_name()),
            self.command_timeout,
        );
        let result = self.runner.run(&spec).await;
        if result.success() {
            self.unit.state = ServiceState::Active;
        }
        result
    }
}

/// Turn a failed result into an error for commands the step cannot do without
pub(crate) fn check(spec: &CommandSpec, result: SubprocessResult) -> Result<(), ProvisionError> {
    if result.success() {
        Ok(())
    } else {
        Err(ProvisionError::CommandFailed {
            description: spec.description.clone(),
            exit_code: result.exit_code,
        })
    }
}
