//! Provisioning operations and the pipeline built from them

pub mod directories;
pub mod prompt;
pub mod service;
pub mod steps;
pub mod verify;

pub use directories::{DirectoryProvisioner, FileRole, ProvisionSummary, SourceTree};
pub use prompt::{Prompter, TermPrompter};
pub use service::{ServiceLifecycleManager, ServiceState, ServiceUnit, StopOutcome};
pub use steps::{build_pipeline, PipelineOptions};
pub use verify::{verify_installation, Check, VerificationReport};
