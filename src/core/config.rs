//! Installer configuration with YAML overrides

use crate::core::directive::ConfigDirective;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level installer configuration
///
/// Every field has a default matching the target device, so an override file
/// only needs the fields it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Filesystem locations of inputs and install targets
    pub paths: PathsConfig,

    /// Name of the background service unit (without `.service`)
    pub service_name: String,

    /// Hostname prefix, joined to the hardware suffix with `-`
    pub hostname_prefix: String,

    /// Boot firmware directives to enable, in `key=value` form
    pub directives: Vec<String>,

    /// Hardware-access groups the invoking user is added to
    pub groups: Vec<String>,

    /// Performance-tuning units to enable
    pub tuning_units: Vec<String>,

    /// Timeouts per operation class
    pub timeouts: TimeoutConfig,

    /// Liveness polling interval of the subprocess supervisor
    pub poll_interval_ms: u64,
}

/// Filesystem paths used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the application tree and install artifacts
    pub source_root: PathBuf,

    /// Application source tree, relative to `source_root`
    pub app_dir: PathBuf,

    /// Optional helper scripts tree, relative to `source_root`
    pub scripts_dir: PathBuf,

    /// OS package manifest, relative to `source_root`
    pub os_manifest: PathBuf,

    /// Language runtime manifest, relative to `source_root`
    pub runtime_manifest: PathBuf,

    /// Service unit definition, relative to `source_root`
    pub service_source: PathBuf,

    /// Optional application JSON config, relative to `source_root`
    pub app_config: PathBuf,

    /// Application entry point, relative to the installed app tree
    pub entry_point: PathBuf,

    /// Command-line helpers shipped in the app tree, checked by verification
    pub cli_helpers: Vec<PathBuf>,

    /// Install root for the application tree
    pub install_root: PathBuf,

    /// Launcher executable path
    pub launcher: PathBuf,

    /// Directory where system service units live
    pub unit_dir: PathBuf,

    /// Boot firmware config candidates, first existing wins
    pub boot_config_candidates: Vec<PathBuf>,

    /// Loopback alias table
    pub hosts_file: PathBuf,

    /// OS hostname store
    pub hostname_file: PathBuf,

    /// Network interface sysfs root
    pub net_class_dir: PathBuf,
}

/// Timeouts in seconds, one per class of operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Service stop and status queries
    pub service_stop_secs: u64,

    /// Short local commands (unit reload, enable, chown, hostname)
    pub command_secs: u64,

    /// Package repository sync
    pub package_sync_secs: u64,

    /// OS package installation
    pub package_install_secs: u64,

    /// Runtime environment creation and dependency installation
    pub runtime_install_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            service_name: "dagr".to_string(),
            hostname_prefix: "dagr".to_string(),
            directives: vec![
                "dtparam=spi=on".to_string(),
                "dtparam=i2c_arm=on".to_string(),
            ],
            groups: vec!["spi".to_string(), "i2c".to_string(), "gpio".to_string()],
            tuning_units: vec!["fstrim.timer".to_string(), "zramswap.service".to_string()],
            timeouts: TimeoutConfig::default(),
            poll_interval_ms: 100,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            app_dir: PathBuf::from("src"),
            scripts_dir: PathBuf::from("scripts"),
            os_manifest: PathBuf::from("system-packages.txt"),
            runtime_manifest: PathBuf::from("requirements.txt"),
            service_source: PathBuf::from("dagr.service"),
            app_config: PathBuf::from("config/config.json"),
            entry_point: PathBuf::from("dagr.py"),
            cli_helpers: vec![PathBuf::from("dagr_display"), PathBuf::from("dagr_update")],
            install_root: PathBuf::from("/usr/local/dagr"),
            launcher: PathBuf::from("/usr/local/bin/dagr"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            boot_config_candidates: vec![
                PathBuf::from("/boot/firmware/config.txt"),
                PathBuf::from("/boot/config.txt"),
            ],
            hosts_file: PathBuf::from("/etc/hosts"),
            hostname_file: PathBuf::from("/etc/hostname"),
            net_class_dir: PathBuf::from("/sys/class/net"),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            service_stop_secs: 30,
            command_secs: 60,
            package_sync_secs: 600,
            package_install_secs: 1800,
            runtime_install_secs: 1800,
        }
    }
}

impl InstallerConfig {
    /// Load installer configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse installer configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: InstallerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the installer configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name must not be empty");
        }
        if self.hostname_prefix.trim().is_empty() {
            anyhow::bail!("hostname_prefix must not be empty");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        self.paths.validate_install_root()?;
        if self.paths.boot_config_candidates.is_empty() {
            anyhow::bail!("paths.boot_config_candidates must list at least one path");
        }

        let t = &self.timeouts;
        for (name, secs) in [
            ("service_stop_secs", t.service_stop_secs),
            ("command_secs", t.command_secs),
            ("package_sync_secs", t.package_sync_secs),
            ("package_install_secs", t.package_install_secs),
            ("runtime_install_secs", t.runtime_install_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("timeouts.{} must be greater than zero", name);
            }
        }
        if t.service_stop_secs >= t.package_install_secs {
            anyhow::bail!(
                "timeouts.service_stop_secs ({}) must be shorter than timeouts.package_install_secs ({})",
                t.service_stop_secs,
                t.package_install_secs
            );
        }

        for directive in &self.directives {
            ConfigDirective::parse(directive)
                .map_err(|e| anyhow::anyhow!("Invalid directive '{}': {}", directive, e))?;
        }

        Ok(())
    }

    /// Parsed boot directives
    pub fn parsed_directives(&self) -> Vec<ConfigDirective> {
        self.directives
            .iter()
            .filter_map(|d| ConfigDirective::parse(d).ok())
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl PathsConfig {
    /// The install root is removed wholesale on every run, so it must be an
    /// absolute path below `/` that does not contain the installer sources
    fn validate_install_root(&self) -> Result<()> {
        let root = &self.install_root;
        if !root.is_absolute() {
            anyhow::bail!("paths.install_root must be absolute, got '{}'", root.display());
        }
        if root.parent().is_none() {
            anyhow::bail!("paths.install_root must not be the filesystem root");
        }
        if self.source_root.is_absolute() && self.source_root.starts_with(root) {
            anyhow::bail!(
                "paths.install_root '{}' contains paths.source_root '{}'",
                root.display(),
                self.source_root.display()
            );
        }
        Ok(())
    }

    fn from_source(&self, relative: &Path) -> PathBuf {
        self.source_root.join(relative)
    }

    pub fn app_source(&self) -> PathBuf {
        self.from_source(&self.app_dir)
    }

    /// Application entry point inside the source tree
    pub fn entry_point_source(&self) -> PathBuf {
        self.app_source().join(&self.entry_point)
    }

    pub fn scripts_source(&self) -> PathBuf {
        self.from_source(&self.scripts_dir)
    }

    pub fn os_manifest_path(&self) -> PathBuf {
        self.from_source(&self.os_manifest)
    }

    pub fn runtime_manifest_path(&self) -> PathBuf {
        self.from_source(&self.runtime_manifest)
    }

    pub fn service_source_path(&self) -> PathBuf {
        self.from_source(&self.service_source)
    }

    pub fn app_config_source(&self) -> PathBuf {
        self.from_source(&self.app_config)
    }

    pub fn version_source(&self) -> PathBuf {
        self.source_root.join("VERSION")
    }

    /// Installed application tree
    pub fn installed_app(&self) -> PathBuf {
        self.install_root.join(&self.app_dir)
    }

    /// Installed application entry point
    pub fn installed_entry_point(&self) -> PathBuf {
        self.installed_app().join(&self.entry_point)
    }

    pub fn installed_config(&self) -> PathBuf {
        self.install_root.join("config").join("config.json")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.install_root.join("venv")
    }

    /// First boot config candidate that exists
    pub fn resolve_boot_config(&self) -> Option<PathBuf> {
        self.boot_config_candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
    }
}

impl TimeoutConfig {
    pub fn service_stop(&self) -> Duration {
        Duration::from_secs(self.service_stop_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn package_sync(&self) -> Duration {
        Duration::from_secs(self.package_sync_secs)
    }

    pub fn package_install(&self) -> Duration {
        Duration::from_secs(self.package_install_secs)
    }

    pub fn runtime_install(&self) -> Duration {
        Duration::from_secs(self.runtime_install_secs)
    }
}
