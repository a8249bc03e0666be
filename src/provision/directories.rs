//! Install-root provisioning: wholesale replace, copy, then assign ownership
//! and permissions by file role

use crate::core::ProvisionError;
use crate::execution::{CommandRunner, CommandSpec};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Mode for directories and executables
pub const EXEC_MODE: u32 = 0o755;

/// Mode for data and library files
pub const DATA_MODE: u32 = 0o644;

/// Permission class of an installed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Directory,
    Data,
    Executable,
}

impl FileRole {
    pub fn mode(&self) -> u32 {
        match self {
            FileRole::Directory | FileRole::Executable => EXEC_MODE,
            FileRole::Data => DATA_MODE,
        }
    }
}

/// A source directory copied under the install root
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub source: PathBuf,
    /// Destination, relative to the install root
    pub dest: PathBuf,
    /// Missing required trees are fatal, missing optional trees are skipped
    pub required: bool,
    /// Every file in the tree is a helper and gets execute permission
    pub all_executable: bool,
}

impl SourceTree {
    pub fn required(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            required: true,
            all_executable: false,
        }
    }

    pub fn optional_scripts(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            required: false,
            all_executable: true,
        }
    }
}

/// What a provisioning pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub files: usize,
    pub executables: usize,
    pub skipped_trees: Vec<PathBuf>,
    /// Best-effort problems (ownership, optional trees), reported as warnings
    pub warnings: Vec<String>,
}

/// Replaces the install root and lays down the source trees
pub struct DirectoryProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    command_timeout: Duration,
    owner: String,
}

impl<'a> DirectoryProvisioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, command_timeout: Duration) -> Self {
        Self {
            runner,
            command_timeout,
            owner: "root:root".to_string(),
        }
    }

    /// Remove `install_root` if present and copy every tree into it
    ///
    /// Required trees are checked before anything is removed.
    pub async fn provision(
        &self,
        trees: &[SourceTree],
        install_root: &Path,
    ) -> Result<ProvisionSummary, ProvisionError> {
        for tree in trees.iter().filter(|t| t.required) {
            if !tree.source.is_dir() {
                return Err(ProvisionError::missing("source tree", &tree.source));
            }
        }

        if install_root.exists() {
            info!("Removing previous install at {}", install_root.display());
            fs::remove_dir_all(install_root).map_err(|e| ProvisionError::io(install_root, e))?;
        }
        fs::create_dir_all(install_root).map_err(|e| ProvisionError::io(install_root, e))?;
        set_mode(install_root, FileRole::Directory)?;

        let mut summary = ProvisionSummary::default();
        for tree in trees {
            if !tree.source.is_dir() {
                debug!("Optional tree {} not present, skipping", tree.source.display());
                summary.skipped_trees.push(tree.source.clone());
                continue;
            }
            copy_tree(tree, &install_root.join(&tree.dest), &mut summary)?;
        }

        self.assign_ownership(install_root, &mut summary).await;

        info!(
            "Installed {} files ({} executable) into {}",
            summary.files,
            summary.executables,
            install_root.display()
        );
        Ok(summary)
    }

    async fn assign_ownership(&self, install_root: &Path, summary: &mut ProvisionSummary) {
        let spec = CommandSpec::new(
            "chown",
            format!("Setting ownership of {}", install_root.display()),
            self.command_timeout,
        )
        .args(["-R", self.owner.as_str()])
        .arg(install_root.display().to_string());

        let result = self.runner.run(&spec).await;
        if !result.success() {
            let message = format!(
                "Could not set ownership of {} to {} (exit code {})",
                install_root.display(),
                self.owner,
                result.exit_code
            );
            warn!("{}", message);
            summary.warnings.push(message);
        }
    }
}

/// Copy one tree. Errors in a required tree are returned; errors in an
/// optional tree become warnings and the rest of the tree is still copied.
fn copy_tree(
    tree: &SourceTree,
    dest_root: &Path,
    summary: &mut ProvisionSummary,
) -> Result<(), ProvisionError> {
    for entry in WalkDir::new(&tree.source).follow_links(false) {
        let copied = entry
            .map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| tree.source.clone());
                ProvisionError::io(path, e.into())
            })
            .and_then(|entry| copy_entry(tree, &entry, dest_root));

        match copied {
            Ok(Some(role)) => {
                summary.files += 1;
                if role == FileRole::Executable {
                    summary.executables += 1;
                }
            }
            Ok(None) => {}
            Err(e) if tree.required => return Err(e),
            Err(e) => {
                let message = format!("Optional tree {}: {}", tree.source.display(), e);
                warn!("{}", message);
                summary.warnings.push(message);
            }
        }
    }
    Ok(())
}

/// Copy one walked entry; returns the role of a copied regular file
fn copy_entry(
    tree: &SourceTree,
    entry: &walkdir::DirEntry,
    dest_root: &Path,
) -> Result<Option<FileRole>, ProvisionError> {
    let relative = entry
        .path()
        .strip_prefix(&tree.source)
        .map_err(|e| ProvisionError::InvalidConfig(e.to_string()))?;
    let target = dest_root.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
        fs::create_dir_all(&target).map_err(|e| ProvisionError::io(&target, e))?;
        set_mode(&target, FileRole::Directory)?;
        Ok(None)
    } else if file_type.is_symlink() {
        let link = fs::read_link(entry.path()).map_err(|e| ProvisionError::io(entry.path(), e))?;
        std::os::unix::fs::symlink(&link, &target).map_err(|e| ProvisionError::io(&target, e))?;
        Ok(None)
    } else {
        fs::copy(entry.path(), &target).map_err(|e| ProvisionError::io(&target, e))?;
        let role = if tree.all_executable {
            FileRole::Executable
        } else {
            classify(entry.path())
        };
        set_mode(&target, role)?;
        Ok(Some(role))
    }
}

/// Executable entry points are shell scripts and anything with a shebang;
/// everything else is data
pub fn classify(path: &Path) -> FileRole {
    if path.is_dir() {
        return FileRole::Directory;
    }
    if path.extension().is_some_and(|ext| ext == "sh") {
        return FileRole::Executable;
    }

    let mut magic = [0u8; 2];
    let has_shebang = fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"#!")
        .unwrap_or(false);

    if has_shebang {
        FileRole::Executable
    } else {
        FileRole::Data
    }
}

fn set_mode(path: &Path, role: FileRole) -> Result<(), ProvisionError> {
    fs::set_permissions(path, fs::Permissions::from_mode(role.mode()))
        .map_err(|e| ProvisionError::io(path, e))
}
