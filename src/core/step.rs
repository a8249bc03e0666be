//! Step domain model

use crate::core::{context::ProvisioningContext, error::ProvisionError, state::StepState};
use async_trait::async_trait;

/// Work performed by a step
///
/// A returned error is a failure of the step. Whether it stops the run is
/// decided by the step's `fatal` flag, not by the action.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError>;
}

/// A single step in the provisioning pipeline
pub struct Step {
    /// Step name, unique within a pipeline
    pub name: String,

    /// Whether failure aborts the whole pipeline
    pub fatal: bool,

    /// What the step does
    pub action: Box<dyn StepAction>,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    pub fn new<A>(name: impl Into<String>, fatal: bool, action: A) -> Self
    where
        A: StepAction + 'static,
    {
        Self {
            name: name.into(),
            fatal,
            action: Box::new(action),
            state: StepState::Pending,
        }
    }

    /// Step that aborts the pipeline on failure
    pub fn fatal<A: StepAction + 'static>(name: impl Into<String>, action: A) -> Self {
        Self::new(name, true, action)
    }

    /// Step whose failure is logged and skipped over
    pub fn recoverable<A: StepAction + 'static>(name: impl Into<String>, action: A) -> Self {
        Self::new(name, false, action)
    }

    /// Step backed by a synchronous closure
    pub fn from_fn<F>(name: impl Into<String>, fatal: bool, f: F) -> Self
    where
        F: Fn(&ProvisioningContext) -> Result<(), ProvisionError> + Send + Sync + 'static,
    {
        Self::new(name, fatal, FnAction(f))
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("fatal", &self.fatal)
            .field("state", &self.state)
            .finish()
    }
}

struct FnAction<F>(F);

#[async_trait]
impl<F> StepAction for FnAction<F>
where
    F: Fn(&ProvisioningContext) -> Result<(), ProvisionError> + Send + Sync,
{
    async fn run(&self, ctx: &ProvisioningContext) -> Result<(), ProvisionError> {
        (self.0)(ctx)
    }
}
