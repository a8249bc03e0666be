//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall provisioning run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every step ran (some may have failed recoverably)
    Completed,
    /// A fatal step failed and the run stopped
    Aborted,
}

impl ExecutionStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionStatus::Completed => 0,
            _ => 1,
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not run yet
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step completed successfully
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed
    Failed {
        error: String,
        fatal: bool,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step never ran because an earlier fatal step failed
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// Wall-clock time spent in the step, when it ran
    pub fn duration(&self) -> Option<std::time::Duration> {
        let (start, end) = match self {
            StepState::Completed {
                started_at,
                completed_at,
            } => (started_at, completed_at),
            StepState::Failed {
                started_at,
                failed_at,
                ..
            } => (started_at, failed_at),
            _ => return None,
        };
        end.signed_duration_since(*start).to_std().ok()
    }
}
