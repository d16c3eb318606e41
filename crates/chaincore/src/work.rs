use crate::{StepError, Value, WorkflowContext};
use async_trait::async_trait;
use std::collections::HashMap;

/// Output payload of a step's work function
pub type StepData = HashMap<String, Value>;

/// The opaque unit of work behind a workflow step.
///
/// Implementations wrap external collaborators (AI generation APIs,
/// publishing APIs, storage) and are treated by the runtime as a single
/// timeout-bounded async call. Timeouts, prerequisites, retries and observer
/// notification all live on the step runner, not here.
#[async_trait]
pub trait StepWork: Send + Sync {
    /// Kind identifier, e.g. "time.delay" or "http.request"
    fn kind(&self) -> &str;

    /// Run the work against the execution's context. Steps read prior step
    /// output via `ctx.step_data` and may stash ad hoc state with
    /// `ctx.set_shared`.
    async fn run(&self, ctx: &WorkflowContext) -> Result<StepData, StepError>;
}

impl std::fmt::Debug for dyn StepWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepWork").field("kind", &self.kind()).finish()
    }
}
