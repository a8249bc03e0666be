//! Provisioning error types

use std::path::PathBuf;
use thiserror::Error;

/// Error types for provisioning operations
///
/// Only preconditions and local filesystem failures end up here. Subprocess
/// outcomes are reported as [`SubprocessResult`](crate::execution::SubprocessResult)
/// values and turned into errors by the calling step when it decides to.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Installer must run as root (effective uid {euid})")]
    NotPrivileged { euid: u32 },

    #[error("Missing {what}: {}", path.display())]
    MissingArtifact { what: String, path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{description} failed with exit code {exit_code}")]
    CommandFailed { description: String, exit_code: i32 },

    #[error("Device identity already set to {0}")]
    IdentityAlreadySet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProvisionError {
    /// Build a missing-artifact error
    pub fn missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ProvisionError::MissingArtifact {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }
}
