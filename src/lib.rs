//! dagr-installer - provisions a single-board computer as a Dagr appliance

pub mod cli;
pub mod core;
pub mod execution;
pub mod provision;

// Re-export commonly used types
pub use core::{ExecutionStatus, InstallerConfig, ProvisionError, ProvisioningContext, Step, StepState};
pub use execution::{CommandRunner, CommandSpec, ExecutionEvent, SequenceReport, StepSequencer};
pub use execution::{OutputMode, SubprocessResult, SubprocessSupervisor};
pub use provision::{build_pipeline, verify_installation, PipelineOptions, Prompter, TermPrompter};
