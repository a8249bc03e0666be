//! Read-only verification of an installed device

use crate::cli::output::{style, CHECK, CROSS, INFO};
use crate::core::InstallerConfig;
use crate::execution::CommandRunner;
use crate::provision::service::ServiceLifecycleManager;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// Top-level sections the application config must carry
pub const REQUIRED_CONFIG_SECTIONS: [&str; 3] = ["display", "web_server", "external_api"];

/// One verification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

impl Check {
    fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }

    fn from_result(name: impl Into<String>, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(name),
            Err(detail) => Self::fail(name, detail),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub checks: Vec<Check>,
}

impl VerificationReport {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Render every check and the tally
    pub fn render(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            if check.passed {
                out.push_str(&format!("{} {}\n", CHECK, check.name));
            } else {
                out.push_str(&format!(
                    "{} {}: {}\n",
                    CROSS,
                    check.name,
                    style(check.detail.as_deref().unwrap_or("failed")).red()
                ));
            }
        }
        out.push_str(&format!(
            "\n{} {}/{} checks passed\n",
            INFO,
            self.passed(),
            self.checks.len()
        ));
        out
    }
}

/// Check the installed tree, launcher, unit and config
pub async fn verify_installation(
    config: &InstallerConfig,
    runner: &dyn CommandRunner,
) -> VerificationReport {
    let paths = &config.paths;
    let unit_name = format!("{}.service", config.service_name);
    let unit_file = paths.unit_dir.join(&unit_name);
    let entry_point = paths.installed_entry_point();
    let installed_config = paths.installed_config();

    let mut checks = Vec::new();
    for (label, path) in [
        ("Version file", paths.install_root.join("VERSION")),
        ("Application entry point", entry_point.clone()),
        ("Configuration file", installed_config.clone()),
        ("Launcher", paths.launcher.clone()),
        ("Service unit", unit_file),
    ] {
        let name = format!("{} exists", label);
        checks.push(if path.exists() {
            Check::pass(name)
        } else {
            Check::fail(name, format!("{} not found", path.display()))
        });
    }

    for (label, path) in [("Launcher", &paths.launcher), ("Entry point", &entry_point)] {
        checks.push(Check::from_result(
            format!("{} is executable", label),
            check_executable(path),
        ));
    }
    for helper in &paths.cli_helpers {
        checks.push(Check::from_result(
            format!("Helper {} is executable", helper.display()),
            check_executable(&paths.installed_app().join(helper)),
        ));
    }

    checks.push(Check::from_result(
        "Version matches source",
        check_version(&paths.install_root.join("VERSION"), &paths.version_source()),
    ));

    checks.push(Check::from_result(
        "Install root owned by root",
        check_root_owned(&paths.install_root),
    ));

    let service = ServiceLifecycleManager::new(runner, config);
    checks.push(if service.is_enabled().await {
        Check::pass("Service enabled")
    } else {
        Check::fail("Service enabled", format!("{} is not enabled", unit_name))
    });

    checks.push(Check::from_result(
        "Configuration sections",
        check_config_sections(&installed_config),
    ));

    debug!(
        "Verification: {}/{} checks passed",
        checks.iter().filter(|c| c.passed).count(),
        checks.len()
    );
    VerificationReport { checks }
}

fn check_executable(path: &Path) -> Result<(), String> {
    let metadata = fs::metadata(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(format!("{} is not executable", path.display()));
    }
    Ok(())
}

/// Installed `VERSION` must match the source one; without a source copy there
/// is nothing to compare against
fn check_version(installed: &Path, source: &Path) -> Result<(), String> {
    let installed_version = fs::read_to_string(installed)
        .map_err(|e| format!("{}: {}", installed.display(), e))?;
    let source_version = match fs::read_to_string(source) {
        Ok(version) => version,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(format!("{}: {}", source.display(), e)),
    };

    match (installed_version.trim(), source_version.trim()) {
        (installed, source) if installed == source => Ok(()),
        (installed, source) => Err(format!(
            "installed {} but source is {}",
            installed, source
        )),
    }
}

fn check_root_owned(path: &Path) -> Result<(), String> {
    let metadata = fs::metadata(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    match metadata.uid() {
        0 => Ok(()),
        uid => Err(format!("{} is owned by uid {}", path.display(), uid)),
    }
}

fn check_config_sections(path: &Path) -> Result<(), String> {
    let content = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| format!("invalid JSON: {}", e))?;

    let missing: Vec<&str> = REQUIRED_CONFIG_SECTIONS
        .iter()
        .copied()
        .filter(|section| value.get(section).is_none())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing sections: {}", missing.join(", ")))
    }
}
