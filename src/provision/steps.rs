//! The provisioning pipeline
//!
//! Each step is a small action over the shared [`ProvisioningContext`]. The
//! order returned by [`build_pipeline`] is the execution order.

use crate::cli::output::{style, ROCKET, WARN};
use crate::core::directive::ensure_enabled;
use crate::core::identity::{set_loopback_alias, IdentityDeriver};
use crate::core::config::PathsConfig;
use crate::core::{ProvisionError, ProvisioningContext, Step, StepAction};
use crate::execution::{CommandRunner, CommandSpec};
use crate::provision::directories::{DirectoryProvisioner, SourceTree, DATA_MODE, EXEC_MODE};
use crate::provision::prompt::Prompter;
use crate::provision::service::{ServiceLifecycleManager, StopOutcome};
use async_trait::async_trait;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options that change which steps do what
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Ask about rebooting at the end of the run
    pub offer_reboot: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { offer_reboot: true }
    }
}

/// Build the fixed provisioning pipeline
///
/// Identity is set before dependencies are installed, the service is stopped
/// before the install root is replaced, and the service is installed only
/// after the tree it runs from exists.
pub fn build_pipeline(
    runner: Arc<dyn CommandRunner>,
    prompter: Arc<dyn Prompter>,
    options: PipelineOptions,
) -> Vec<Step> {
    vec![
        Step::fatal("preflight", Preflight),
        Step::recoverable("stop-service", StopService(runner.clone())),
        Step::fatal("enable-interfaces", EnableInterfaces(runner.clone())),
        Step::recoverable("set-identity", SetIdentity(runner.clone())),
        Step::fatal("install-os-deps", InstallOsDeps(runner.clone())),
        Step::recoverable("tune-performance", TunePerformance(runner.clone())),
        Step::fatal("provision-directories", ProvisionDirectories(runner.clone())),
        Step::fatal("setup-runtime", SetupRuntime(runner.clone())),
        Step::fatal("install-executable", InstallExecutable),
        Step::recoverable("install-config", InstallConfig),
        Step::fatal("install-service", InstallService(runner.clone())),
        Step::recoverable(
            "finish",
            Finish {
                runner,
                prompter,
                offer_reboot: options.offer_reboot,
            },
        ),
    ]
}

/// Run a command whose failure only warrants a warning
///
/// Returns whether the command succeeded.
async fn run_soft(runner: &dyn CommandRunner, ctx: &ProvisioningContext, spec: CommandSpec) -> bool {
    let result = runner.run(&spec).await;
    if result.success() {
        return true;
    }

    let message = if result.timed_out {
        format!(
            "{} timed out after {}s",
            spec.description,
            spec.timeout.as_secs()
        )
    } else {
        format!(
            "{} failed with exit code {}",
            spec.description, result.exit_code
        )
    };
    warn!("{}", message);
    ctx.record_warning(message);
    false
}

/// Package names from a manifest: one per line, `#` starts a comment
pub fn parse_manifest(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_manifest(path: &Path, what: &str) -> Result<Vec<String>, ProvisionError> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProvisionError::missing(what, path),
        _ => ProvisionError::io(path, e),
    })?;
    Ok(parse_manifest(&content))
}

fn missing_boot_config(paths: &PathsConfig) -> ProvisionError {
    let first = paths.boot_config_candidates.first().cloned().unwrap_or_default();
    ProvisionError::missing("boot config", first)
}

/// Privilege and required inputs, checked before anything is touched
pub struct Preflight;

#[async_trait]
impl StepAction for Preflight {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        if !ctx.is_privileged() {
            return Err(ProvisionError::NotPrivileged { euid: ctx.euid });
        }

        let paths = &ctx.config.paths;
        let required_files = [
            ("OS dependency manifest", paths.os_manifest_path()),
            ("runtime dependency manifest", paths.runtime_manifest_path()),
            ("service definition", paths.service_source_path()),
        ];
        for (what, path) in required_files {
            if !path.is_file() {
                return Err(ProvisionError::missing(what, path));
            }
        }

        let app_source = paths.app_source();
        if !app_source.is_dir() {
            return Err(ProvisionError::missing("application source tree", app_source));
        }
        let entry_point = paths.entry_point_source();
        if !entry_point.is_file() {
            return Err(ProvisionError::missing("application entry point", entry_point));
        }

        match paths.resolve_boot_config() {
            Some(boot_config) => debug!("Boot config: {}", boot_config.display()),
            None => return Err(missing_boot_config(paths)),
        }

        if ctx.invoking_user.is_none() {
            debug!("No invoking user known, group membership will be skipped");
        }
        Ok(())
    }
}

pub struct StopService(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for StopService {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let mut manager = ServiceLifecycleManager::new(self.0.as_ref(), &ctx.config);
        match manager.stop().await {
            StopOutcome::NotRunning | StopOutcome::Stopped => {}
            StopOutcome::TimedOut => ctx.record_warning(format!(
                "Stopping {} timed out",
                manager.unit().unit_name()
            )),
            StopOutcome::Failed(code) => ctx.record_warning(format!(
                "Stopping {} failed with exit code {}",
                manager.unit().unit_name(),
                code
            )),
        }
        Ok(())
    }
}

/// Boot directives, then hardware-access group membership
pub struct EnableInterfaces(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for EnableInterfaces {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let paths = &ctx.config.paths;
        let boot_config = paths
            .resolve_boot_config()
            .ok_or_else(|| missing_boot_config(paths))?;

        for directive in ctx.config.parsed_directives() {
            let outcome = ensure_enabled(&boot_config, &directive)?;
            info!("{}: {:?}", directive, outcome);
        }

        let Some(user) = ctx.invoking_user.as_deref() else {
            info!("No invoking user, skipping hardware group membership");
            return Ok(());
        };

        let timeout = ctx.config.timeouts.command();
        for group in &ctx.config.groups {
            let create = CommandSpec::new("groupadd", format!("Ensuring group {}", group), timeout)
                .arg("-f")
                .arg(group.as_str());
            if !run_soft(self.0.as_ref(), ctx, create).await {
                continue;
            }

            let join = CommandSpec::new(
                "usermod",
                format!("Adding {} to group {}", user, group),
                timeout,
            )
            .args(["-a", "-G"])
            .arg(group.as_str())
            .arg(user);
            run_soft(self.0.as_ref(), ctx, join).await;
        }
        Ok(())
    }
}

/// Derive the hostname once and write it to the OS stores
pub struct SetIdentity(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for SetIdentity {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let paths = &ctx.config.paths;
        let deriver = IdentityDeriver::new(&paths.net_class_dir, &ctx.config.hostname_prefix);
        let identity = deriver.derive();
        ctx.set_identity(identity.clone())?;

        if !identity.is_deterministic() {
            ctx.record_warning(format!(
                "Hostname {} is random; no hardware address was found",
                identity.hostname
            ));
        }

        fs::write(&paths.hostname_file, format!("{}\n", identity.hostname))
            .map_err(|e| ProvisionError::io(&paths.hostname_file, e))?;

        let hosts = match fs::read_to_string(&paths.hosts_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ProvisionError::io(&paths.hosts_file, e)),
        };
        let updated = set_loopback_alias(&hosts, &identity.hostname);
        if updated != hosts {
            fs::write(&paths.hosts_file, updated)
                .map_err(|e| ProvisionError::io(&paths.hosts_file, e))?;
        }

        let apply = CommandSpec::new(
            "hostname",
            format!("Setting hostname to {}", identity.hostname),
            ctx.config.timeouts.command(),
        )
        .arg(identity.hostname.as_str());
        run_soft(self.0.as_ref(), ctx, apply).await;

        match identity.ip {
            Some(ip) => info!("Device {} at {}", identity.hostname, ip),
            None => info!("Device {} (no routable address yet)", identity.hostname),
        }
        Ok(())
    }
}

/// Repository sync and OS package install; both are soft on timeout
pub struct InstallOsDeps(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for InstallOsDeps {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let packages = read_manifest(
            &ctx.config.paths.os_manifest_path(),
            "OS dependency manifest",
        )?;
        if packages.is_empty() {
            info!("OS dependency manifest is empty, nothing to install");
            return Ok(());
        }

        let timeouts = &ctx.config.timeouts;
        let sync = CommandSpec::new(
            "apt-get",
            "Updating package lists",
            timeouts.package_sync(),
        )
        .arg("update");
        run_soft(self.0.as_ref(), ctx, sync).await;

        let install = CommandSpec::new(
            "apt-get",
            format!("Installing {} system packages", packages.len()),
            timeouts.package_install(),
        )
        .args(["install", "-y"])
        .args(packages);
        run_soft(self.0.as_ref(), ctx, install).await;
        Ok(())
    }
}

pub struct TunePerformance(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for TunePerformance {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        for unit in &ctx.config.tuning_units {
            let enable = CommandSpec::new(
                "systemctl",
                format!("Enabling {}", unit),
                ctx.config.timeouts.command(),
            )
            .arg("enable")
            .arg(unit.as_str());
            run_soft(self.0.as_ref(), ctx, enable).await;
        }
        Ok(())
    }
}

pub struct ProvisionDirectories(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for ProvisionDirectories {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let paths = &ctx.config.paths;
        let trees = [
            SourceTree::required(paths.app_source(), &paths.app_dir),
            SourceTree::optional_scripts(paths.scripts_source(), &paths.scripts_dir),
        ];

        let provisioner = DirectoryProvisioner::new(self.0.as_ref(), ctx.config.timeouts.command());
        let summary = provisioner.provision(&trees, &paths.install_root).await?;
        for warning in summary.warnings {
            ctx.record_warning(warning);
        }

        let version = paths.version_source();
        if version.is_file() {
            let target = paths.install_root.join("VERSION");
            fs::copy(&version, &target).map_err(|e| ProvisionError::io(&target, e))?;
            fs::set_permissions(&target, fs::Permissions::from_mode(DATA_MODE))
                .map_err(|e| ProvisionError::io(&target, e))?;
        }
        Ok(())
    }
}

/// Virtual environment and runtime dependencies
pub struct SetupRuntime(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for SetupRuntime {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let paths = &ctx.config.paths;
        let manifest = paths.runtime_manifest_path();
        if !manifest.is_file() {
            return Err(ProvisionError::missing("runtime dependency manifest", manifest));
        }

        let timeout = ctx.config.timeouts.runtime_install();
        let venv = paths.venv_dir();
        let create = CommandSpec::new("python3", "Creating virtual environment", timeout)
            .args(["-m", "venv"])
            .arg(venv.display().to_string());
        if !run_soft(self.0.as_ref(), ctx, create).await {
            return Ok(());
        }

        let install = CommandSpec::new(
            venv.join("bin").join("pip").display().to_string(),
            "Installing runtime dependencies",
            timeout,
        )
        .args(["install", "-r"])
        .arg(manifest.display().to_string());
        run_soft(self.0.as_ref(), ctx, install).await;
        Ok(())
    }
}

/// Launcher script that runs the entry point with the environment's interpreter
pub fn launcher_script(interpreter: &Path, entry_point: &Path) -> String {
    format!(
        "#!/bin/sh\nexec \"{}\" \"{}\" \"$@\"\n",
        interpreter.display(),
        entry_point.display()
    )
}

pub struct InstallExecutable;

#[async_trait]
impl StepAction for InstallExecutable {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let paths = &ctx.config.paths;
        let entry_point = paths.installed_entry_point();
        if !entry_point.is_file() {
            return Err(ProvisionError::missing("application entry point", entry_point));
        }

        let launcher = &paths.launcher;
        if let Some(parent) = launcher.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }
        let interpreter = paths.venv_dir().join("bin").join("python3");
        fs::write(launcher, launcher_script(&interpreter, &entry_point))
            .map_err(|e| ProvisionError::io(launcher, e))?;
        fs::set_permissions(launcher, fs::Permissions::from_mode(EXEC_MODE))
            .map_err(|e| ProvisionError::io(launcher, e))?;

        info!("Installed launcher {}", launcher.display());
        Ok(())
    }
}

/// Optional JSON config, copied verbatim
pub struct InstallConfig;

#[async_trait]
impl StepAction for InstallConfig {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let paths = &ctx.config.paths;
        let source = paths.app_config_source();
        if !source.is_file() {
            info!("No application config at {}, skipping", source.display());
            return Ok(());
        }

        let content = fs::read_to_string(&source).map_err(|e| ProvisionError::io(&source, e))?;
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&content) {
            let message = format!("{} is not valid JSON: {}", source.display(), e);
            warn!("{}", message);
            ctx.record_warning(message);
        }

        let target = paths.installed_config();
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }
        fs::write(&target, content).map_err(|e| ProvisionError::io(&target, e))?;
        fs::set_permissions(&target, fs::Permissions::from_mode(DATA_MODE))
            .map_err(|e| ProvisionError::io(&target, e))?;
        Ok(())
    }
}

pub struct InstallService(Arc<dyn CommandRunner>);

#[async_trait]
impl StepAction for InstallService {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let mut manager = ServiceLifecycleManager::new(self.0.as_ref(), &ctx.config);
        manager.install_and_enable().await?;

        let result = manager.start().await;
        if !result.success() {
            let message = format!(
                "{} did not start (exit code {})",
                manager.unit().unit_name(),
                result.exit_code
            );
            warn!("{}", message);
            ctx.record_warning(message);
        }
        Ok(())
    }
}

/// Summary and reboot offer
pub struct Finish {
    runner: Arc<dyn CommandRunner>,
    prompter: Arc<dyn Prompter>,
    offer_reboot: bool,
}

#[async_trait]
impl StepAction for Finish {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        let hostname = ctx
            .identity()
            .map(|i| i.hostname.clone())
            .unwrap_or_else(|| "(unchanged)".to_string());

        println!(
            "\n{} {}",
            ROCKET,
            style("Provisioning complete").green().bold()
        );
        println!("  Hostname:     {}", style(&hostname).cyan());
        println!(
            "  Install root: {}",
            ctx.config.paths.install_root.display()
        );

        let warnings = ctx.warnings();
        if !warnings.is_empty() {
            println!(
                "\n{} {} warning(s):",
                WARN,
                style(warnings.len()).yellow()
            );
            for line in ctx.format_warnings().lines() {
                println!("  {}", style(line).dim());
            }
        }

        if !self.offer_reboot {
            info!("Reboot prompt disabled");
            return Ok(());
        }

        if self
            .prompter
            .confirm("Reboot now to apply hardware interface changes?")
        {
            let reboot = CommandSpec::new("reboot", "Rebooting", ctx.config.timeouts.command());
            let result = self.runner.run(&reboot).await;
            if !result.success() {
                return Err(ProvisionError::CommandFailed {
                    description: reboot.description,
                    exit_code: result.exit_code,
                });
            }
        } else {
            println!(
                "\nReboot later to apply hardware interface changes: {}",
                style("sudo reboot").bold()
            );
        }
        Ok(())
    }
}
