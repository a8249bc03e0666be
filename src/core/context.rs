//! Provisioning context - configuration and facts shared by every step

use crate::core::{config::InstallerConfig, error::ProvisionError, identity::DeviceIdentity};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

/// Context for one provisioning run
///
/// Built once at startup and handed to every step by shared reference. The
/// device identity is the only derived value, and it can be set once.
#[derive(Debug)]
pub struct ProvisioningContext {
    /// Resolved installer configuration
    pub config: InstallerConfig,

    /// Stream subprocess output and emit extra diagnostics
    pub verbose: bool,

    /// Effective uid of this process
    pub euid: u32,

    /// User who invoked the installer through sudo, if known
    pub invoking_user: Option<String>,

    /// Identifier of this run, for log correlation
    pub run_id: Uuid,

    identity: OnceLock<DeviceIdentity>,

    current_step: Mutex<Option<String>>,

    notes: Mutex<Vec<ContextNote>>,
}

/// A soft failure recorded by a step that kept going
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextNote {
    /// The note content
    pub content: String,

    /// Which step created this note
    pub from_step: String,

    /// When the note was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProvisioningContext {
    /// Create a context with explicit process facts
    pub fn new(config: InstallerConfig, verbose: bool, euid: u32, invoking_user: Option<String>) -> Self {
        Self {
            config,
            verbose,
            euid,
            invoking_user,
            run_id: Uuid::new_v4(),
            identity: OnceLock::new(),
            current_step: Mutex::new(None),
            notes: Mutex::new(Vec::new()),
        }
    }

    /// Create a context from the running process
    pub fn from_process(config: InstallerConfig, verbose: bool) -> Self {
        let euid = unsafe { libc::geteuid() };
        let invoking_user = std::env::var("SUDO_USER")
            .ok()
            .filter(|u| !u.is_empty() && u != "root");
        Self::new(config, verbose, euid, invoking_user)
    }

    pub fn is_privileged(&self) -> bool {
        self.euid == 0
    }

    /// Record the identity. A second call is an error: identity is derived
    /// once per run.
    pub fn set_identity(&self, identity: DeviceIdentity) -> Result<(), ProvisionError> {
        self.identity
            .set(identity)
            .map_err(|rejected| ProvisionError::IdentityAlreadySet(rejected.hostname))
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.get()
    }

    pub(crate) fn begin_step(&self, name: &str) {
        if let Ok(mut current) = self.current_step.lock() {
            *current = Some(name.to_string());
        }
    }

    /// Record a soft failure against the running step
    pub fn record_warning(&self, content: impl Into<String>) {
        let from_step = self
            .current_step
            .lock()
            .ok()
            .and_then(|c| c.clone())
            .unwrap_or_else(|| "startup".to_string());

        let note = ContextNote {
            content: content.into(),
            from_step,
            timestamp: chrono::Utc::now(),
        };
        if let Ok(mut notes) = self.notes.lock() {
            notes.push(note);
        }
    }

    /// All soft failures recorded so far
    pub fn warnings(&self) -> Vec<ContextNote> {
        self.notes.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Get all warnings as a formatted string
    pub fn format_warnings(&self) -> String {
        self.warnings()
            .iter()
            .enumerate()
            .map(|(i, note)| format!("{}. [{}] {}\n", i + 1, note.from_step, note.content))
            .collect()
    }
}
