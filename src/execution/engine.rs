//! Step sequencer - runs the provisioning pipeline in order

use crate::core::{ExecutionStatus, ProvisioningContext, Step, StepState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a provisioning run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        total_steps: usize,
    },
    StepStarted {
        index: usize,
        total: usize,
        name: String,
    },
    StepCompleted {
        name: String,
    },
    StepFailed {
        name: String,
        error: String,
        fatal: bool,
    },
    StepSkipped {
        name: String,
    },
    RunFinished {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Outcome of one step, as reported after the run
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub fatal: bool,
    pub state: StepState,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub run_id: Uuid,
    pub status: ExecutionStatus,
    pub steps: Vec<StepReport>,
}

impl SequenceReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Names of steps that failed without stopping the run
    pub fn soft_failures(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| matches!(s.state, StepState::Failed { fatal: false, .. }))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// The step that aborted the run, if any
    pub fn fatal_failure(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.state, StepState::Failed { fatal: true, .. }))
    }

    /// Names of steps that ran, in order
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| !matches!(s.state, StepState::Skipped { .. } | StepState::Pending))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Runs steps strictly in insertion order
///
/// A failing fatal step stops the run; every later step is marked skipped
/// and nothing is rolled back. A failing recoverable step is logged and the
/// run moves on.
#[derive(Default)]
pub struct StepSequencer {
    event_handlers: Vec<EventHandler>,
}

impl StepSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(&event);
        }
    }

    /// Execute the pipeline
    pub async fn run(&self, mut steps: Vec<Step>, ctx: &ProvisioningContext) -> SequenceReport {
        let total = steps.len();
        info!("Starting provisioning run {} ({} steps)", ctx.run_id, total);
        self.emit_event(ExecutionEvent::RunStarted {
            run_id: ctx.run_id,
            total_steps: total,
        });

        let mut status = ExecutionStatus::Running;
        let mut aborted_by: Option<String> = None;

        for (index, step) in steps.iter_mut().enumerate() {
            if let Some(failed) = &aborted_by {
                step.state = StepState::Skipped {
                    reason: format!("fatal failure in {}", failed),
                };
                self.emit_event(ExecutionEvent::StepSkipped {
                    name: step.name.clone(),
                });
                continue;
            }

            ctx.begin_step(&step.name);
            let started_at = chrono::Utc::now();
            step.state = StepState::Running { started_at };
            self.emit_event(ExecutionEvent::StepStarted {
                index: index + 1,
                total,
                name: step.name.clone(),
            });

            match step.action.run(ctx).await {
                Ok(()) => {
                    step.state = StepState::Completed {
                        started_at,
                        completed_at: chrono::Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepCompleted {
                        name: step.name.clone(),
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    if step.fatal {
                        error!("Step {} failed: {}", step.name, message);
                        aborted_by = Some(step.name.clone());
                        status = ExecutionStatus::Aborted;
                    } else {
                        warn!("Step {} failed, continuing: {}", step.name, message);
                        ctx.record_warning(message.clone());
                    }
                    step.state = StepState::Failed {
                        error: message.clone(),
                        fatal: step.fatal,
                        started_at,
                        failed_at: chrono::Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepFailed {
                        name: step.name.clone(),
                        error: message,
                        fatal: step.fatal,
                    });
                }
            }
        }

        if status == ExecutionStatus::Running {
            status = ExecutionStatus::Completed;
        }
        info!("Provisioning run {} finished: {:?}", ctx.run_id, status);
        self.emit_event(ExecutionEvent::RunFinished {
            run_id: ctx.run_id,
            status,
        });

        SequenceReport {
            run_id: ctx.run_id,
            status,
            steps: steps
                .into_iter()
                .map(|s| StepReport {
                    name: s.name,
                    fatal: s.fatal,
                    state: s.state,
                })
                .collect(),
        }
    }
}
