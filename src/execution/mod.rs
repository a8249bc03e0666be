//! Pipeline execution: the step sequencer and the subprocess supervisor

pub mod engine;
pub mod supervisor;

pub use engine::{ExecutionEvent, SequenceReport, StepReport, StepSequencer};
pub use supervisor::{CommandRunner, CommandSpec, OutputMode, SubprocessResult, SubprocessSupervisor};
