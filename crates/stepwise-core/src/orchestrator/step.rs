//! Running one step to its final per-action results.

use tracing::{info, warn};

use crate::error::{EngineError, Result};

use super::action::{Step, StepResult};
use super::context::OrchestrationContext;
use super::retry::{RetryController, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub result: StepResult,
    pub succeeded: bool,
}

/// Run `step` under `policy`. The returned results are in action index order,
/// one per action.
pub async fn execute_step(
    ctx: &OrchestrationContext,
    policy: RetryPolicy,
    step: &Step,
) -> Result<StepOutcome> {
    let run = RetryController::new(ctx, policy).run(step).await?;

    if run.results.len() != step.actions.len() {
        return Err(EngineError::Orchestration(format!(
            "expected {} results but got {} (step={})",
            step.actions.len(),
            run.results.len(),
            step.name
        )));
    }

    if !ctx.is_replaying() {
        if run.succeeded {
            info!(
                instance_id = ctx.instance_id(),
                step = %step.name,
                attempts = run.attempts,
                "step completed"
            );
        } else {
            warn!(
                instance_id = ctx.instance_id(),
                step = %step.name,
                attempts = run.attempts,
                "step failed"
            );
        }
    }

    Ok(StepOutcome {
        result: StepResult {
            name: step.name.clone(),
            actions: run.results.into_values().collect(),
        },
        succeeded: run.succeeded,
    })
}
