//! Bounded retry of a step's actions.
//!
//! Each round dispatches every action that has no final result yet, waits
//! for all of them (and, for asynchronous dispatch, for their correlated
//! completion events), then folds the round:
//!
//! - nothing failed: every dispatched action is recorded, the step succeeds;
//! - something failed on the last allowed attempt: every dispatched action is
//!   recorded, failures included, and the step fails;
//! - otherwise only the successes are recorded and the failures are retried
//!   after the configured delay.
//!
//! The fold is a pure function of the recorded outcomes, so replaying the
//! same history reproduces the same final results.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RetryConfig;
use crate::error::{EngineError, Result};

use super::action::{ActionOutcome, ActionResult, Step};
use super::context::OrchestrationContext;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per action, at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts(), config.delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDecision {
    Succeeded,
    Exhausted,
    Retry,
}

/// Fold one round into `final_results`.
///
/// `dispatched` lists the action indices attempted this round; an index with
/// no entry in `outcomes` counts as failed.
pub fn fold_round(
    step: &Step,
    final_results: &mut BTreeMap<usize, ActionResult>,
    dispatched: &[usize],
    outcomes: &BTreeMap<usize, ActionOutcome>,
    attempt: u32,
    max_attempts: u32,
) -> RoundDecision {
    let failed = |i: &usize| outcomes.get(i).map(ActionOutcome::is_failure).unwrap_or(true);
    let any_failed = dispatched.iter().any(failed);

    let decision = if !any_failed {
        RoundDecision::Succeeded
    } else if attempt >= max_attempts {
        RoundDecision::Exhausted
    } else {
        RoundDecision::Retry
    };

    for i in dispatched {
        if decision == RoundDecision::Retry && failed(i) {
            continue;
        }
        let result = outcomes.get(i).and_then(|o| o.result.clone());
        final_results.insert(
            *i,
            ActionResult::new(step.actions[*i].clone(), result, attempt),
        );
    }
    decision
}

// ---------------------------------------------------------------------------
// RetryController
// ---------------------------------------------------------------------------

/// Final per-index results of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRun {
    pub results: BTreeMap<usize, ActionResult>,
    pub succeeded: bool,
    pub attempts: u32,
}

pub struct RetryController<'a> {
    ctx: &'a OrchestrationContext,
    policy: RetryPolicy,
}

impl<'a> RetryController<'a> {
    pub fn new(ctx: &'a OrchestrationContext, policy: RetryPolicy) -> Self {
        Self { ctx, policy }
    }

    pub async fn run(&self, step: &Step) -> Result<StepRun> {
        let mut final_results = BTreeMap::new();
        let mut attempt = 1;

        loop {
            let pending: Vec<usize> = (0..step.actions.len())
                .filter(|i| !final_results.contains_key(i))
                .collect();
            if pending.is_empty() {
                return Err(EngineError::Orchestration(format!(
                    "no actions to process (step={})",
                    step.name
                )));
            }

            let outcomes = self.run_round(step, &pending).await?;
            let decision = fold_round(
                step,
                &mut final_results,
                &pending,
                &outcomes,
                attempt,
                self.policy.max_attempts,
            );

            match decision {
                RoundDecision::Succeeded | RoundDecision::Exhausted => {
                    return Ok(StepRun {
                        results: final_results,
                        succeeded: decision == RoundDecision::Succeeded,
                        attempts: attempt,
                    });
                }
                RoundDecision::Retry => {
                    if !self.ctx.is_replaying() {
                        info!(
                            instance_id = self.ctx.instance_id(),
                            step = %step.name,
                            attempt,
                            remaining = step.actions.len() - final_results.len(),
                            delay_ms = self.policy.delay.as_millis() as u64,
                            "step has failed actions, retrying"
                        );
                    }
                    attempt += 1;
                    self.ctx.schedule_delay(self.policy.delay).await?;
                }
            }
        }
    }

    /// Fan out one round and wait for all of it to resolve.
    async fn run_round(
        &self,
        step: &Step,
        pending: &[usize],
    ) -> Result<BTreeMap<usize, ActionOutcome>> {
        // Dispatch futures are created in index order, which fixes their task
        // sequence numbers before any of them is awaited.
        let dispatches = pending.iter().map(|&i| {
            let fut = self.ctx.dispatch(&step.actions[i]);
            async move { (i, fut.await) }
        });
        let mut outcomes = BTreeMap::new();
        for (i, outcome) in join_all(dispatches).await {
            outcomes.insert(i, outcome?);
        }

        let tokens: Vec<(usize, String)> = outcomes
            .iter()
            .filter(|(_, o)| o.is_pending())
            .filter_map(|(i, o)| o.correlation_token.clone().map(|t| (*i, t)))
            .collect();
        if tokens.is_empty() {
            return Ok(outcomes);
        }

        let waits = tokens.iter().map(|(i, token)| async move {
            (*i, self.ctx.await_event(token).await)
        });
        for (i, event) in join_all(waits).await {
            outcomes.insert(i, event?.into_outcome());
        }
        Ok(outcomes)
    }
}
