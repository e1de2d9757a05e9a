//! Sequencing of steps into one processing run.
//!
//! The orchestrator walks the payload's steps in order, halts on the first
//! step that does not fully succeed, pads everything after it with
//! unattempted results, and persists the single `ProcessingResult`.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

use super::action::{Payload, ProcessingResult, RunStatus, StepResult};
use super::context::OrchestrationContext;
use super::instance::OrchestrationState;
use super::retry::RetryPolicy;
use super::step::execute_step;

/// Terminal output of a run whose result was built and persisted.
pub const WORKFLOW_DONE: &str = "workflow done";

/// Tracks the state machine position and mirrors it onto the instance record.
struct Orchestrator<'a> {
    ctx: &'a OrchestrationContext,
    state: Option<OrchestrationState>,
}

impl<'a> Orchestrator<'a> {
    fn new(ctx: &'a OrchestrationContext) -> Self {
        Self { ctx, state: None }
    }

    fn advance(&mut self, next: OrchestrationState) -> Result<()> {
        let legal = match &self.state {
            None => matches!(
                next,
                OrchestrationState::Running { step: 0 } | OrchestrationState::Finalizing
            ),
            Some(current) => current.can_advance_to(&next),
        };
        if !legal {
            return Err(EngineError::Orchestration(format!(
                "illegal state transition {:?} -> {next:?}",
                self.state
            )));
        }
        debug!(instance_id = self.ctx.instance_id(), state = ?next, "state transition");
        self.ctx.set_state(next)?;
        self.state = Some(next);
        Ok(())
    }
}

/// Run the orchestration for `input` to completion.
///
/// Business failures (a step exhausting its retries) end in a persisted
/// `Failed` result and still return `WORKFLOW_DONE`. Only faults surface as
/// errors.
pub async fn run_orchestration(
    ctx: &OrchestrationContext,
    policy: RetryPolicy,
    input: &Value,
) -> Result<String> {
    let payload = Payload::from_value(input)?;
    let mut machine = Orchestrator::new(ctx);

    if !ctx.is_replaying() {
        info!(
            instance_id = ctx.instance_id(),
            steps = payload.steps.len(),
            actions = payload.action_count(),
            max_attempts = policy.max_attempts,
            "orchestration started"
        );
    }

    let mut step_results = Vec::with_capacity(payload.steps.len());
    let mut failed = false;
    for (index, step) in payload.steps.iter().enumerate() {
        machine.advance(OrchestrationState::Running { step: index })?;
        let outcome = execute_step(ctx, policy, step).await?;
        step_results.push(outcome.result);
        if !outcome.succeeded {
            machine.advance(OrchestrationState::StepFailed { step: index })?;
            failed = true;
            break;
        }
    }

    machine.advance(OrchestrationState::Finalizing)?;
    let result = build_result(ctx.instance_id(), &payload, step_results, failed);
    ctx.persist(&result).await?;
    machine.advance(OrchestrationState::Done)?;

    if !ctx.is_replaying() {
        info!(
            instance_id = ctx.instance_id(),
            status = result.status.as_str(),
            "orchestration finished"
        );
    }
    Ok(WORKFLOW_DONE.to_string())
}

/// Assemble the final result, padding steps that never ran.
pub fn build_result(
    id: &str,
    payload: &Payload,
    mut step_results: Vec<StepResult>,
    failed: bool,
) -> ProcessingResult {
    for step in payload.steps.iter().skip(step_results.len()) {
        step_results.push(StepResult::unattempted(step));
    }
    ProcessingResult {
        id: id.to_string(),
        status: if failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        },
        steps: step_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchMode;
    use crate::orchestrator::correlation::CorrelatedEvent;
    use crate::orchestrator::db::ResultStore;
    use crate::testing::{Harness, RecordingPublisher, Reply};
    use serde_json::json;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    fn assert_shape(input: &Value, result: &ProcessingResult) {
        let payload = Payload::from_value(input).unwrap();
        assert_eq!(result.steps.len(), payload.steps.len());
        for (step, recorded) in payload.steps.iter().zip(&result.steps) {
            assert_eq!(recorded.name, step.name);
            assert_eq!(recorded.actions.len(), step.actions.len());
        }
    }

    #[tokio::test]
    async fn single_successful_action_completes() {
        let h = Harness::new(DispatchMode::Sync);
        h.invoker.script("svcA", vec![Reply::ok(json!({"v": "A"}))]);
        let input = json!({"steps": [{"name": "s1", "actions": [{"action": "svcA", "content": "x"}]}]});

        let out = run_orchestration(&h.context("wf"), fast(3), &input)
            .await
            .unwrap();
        assert_eq!(out, WORKFLOW_DONE);

        let result = h.db.load("wf").unwrap().unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "id": "wf",
                "status": "Completed",
                "steps": [{"name": "s1", "actions": [
                    {"action": "svcA", "content": "x", "result": {"v": "A"}, "attempt_count": 1}
                ]}]
            })
        );
        let record = h.db.get_instance("wf").unwrap().unwrap();
        assert_eq!(record.state, Some(OrchestrationState::Done));
    }

    #[tokio::test]
    async fn failing_step_halts_and_pads_later_steps() {
        let h = Harness::new(DispatchMode::Sync);
        h.invoker.script("ok", vec![Reply::ok(json!("fine"))]);
        h.invoker.script("bad", vec![Reply::fail()]);
        let input = json!({"steps": [
            {"name": "s1", "actions": [{"action": "ok", "content": "1"}]},
            {"name": "s2", "actions": [{"action": "bad", "content": "2"}]},
            {"name": "s3", "actions": [
                {"action": "ok", "content": "3"},
                {"action": "ok", "content": "4"}
            ]}
        ]});

        run_orchestration(&h.context("wf"), fast(3), &input)
            .await
            .unwrap();
        let result = h.db.load("wf").unwrap().unwrap();
        assert_shape(&input, &result);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.steps[0].actions[0].attempt_count, 1);
        assert_eq!(result.steps[1].actions[0].attempt_count, 3);
        assert!(result.steps[2]
            .actions
            .iter()
            .all(|a| a.attempt_count == 0 && a.result.is_none()));
        // Step s3 never dispatched.
        assert_eq!(h.invoker.calls_to("ok"), 1);

        let record = h.db.get_instance("wf").unwrap().unwrap();
        assert_eq!(record.state, Some(OrchestrationState::Done));
    }

    #[tokio::test]
    async fn all_first_attempt_successes() {
        let h = Harness::new(DispatchMode::Sync);
        for svc in ["a", "b", "c"] {
            h.invoker.script(svc, vec![Reply::ok(json!({ "from": svc }))]);
        }
        let input = json!({"steps": [
            {"name": "s1", "actions": [{"action": "a", "content": ""}, {"action": "b", "content": ""}]},
            {"name": "s2", "actions": [{"action": "c", "content": ""}]}
        ]});

        run_orchestration(&h.context("wf"), RetryPolicy::single_attempt(), &input)
            .await
            .unwrap();
        let result = h.db.load("wf").unwrap().unwrap();
        assert_shape(&input, &result);
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result
            .steps
            .iter()
            .flat_map(|s| &s.actions)
            .all(|a| a.attempt_count == 1));
    }

    #[tokio::test]
    async fn empty_payload_completes_with_no_steps() {
        let h = Harness::new(DispatchMode::Sync);
        run_orchestration(&h.context("wf"), fast(3), &json!({"steps": []}))
            .await
            .unwrap();
        let result = h.db.load("wf").unwrap().unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_fault() {
        let h = Harness::new(DispatchMode::Sync);
        let err = run_orchestration(&h.context("wf"), fast(3), &json!({"nope": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedPayload(_)));
        assert!(h.db.load("wf").unwrap().is_none());
    }

    #[tokio::test]
    async fn async_result_is_the_event_response() {
        let h = Harness::new(DispatchMode::Async);
        h.hub
            .raise(CorrelatedEvent {
                instance_id: "wf".into(),
                correlation_id: "wf-0".into(),
                response: json!({"ok": true}),
            })
            .unwrap();
        let input = json!({"steps": [{"name": "s1", "actions": [{"action": "topicA", "content": "x"}]}]});

        run_orchestration(&h.context("wf"), fast(1), &input)
            .await
            .unwrap();
        let result = h.db.load("wf").unwrap().unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.steps[0].actions[0].result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn async_publish_failure_fails_the_step() {
        let h = Harness::with_publisher(DispatchMode::Async, RecordingPublisher::failing(["down"]));
        let input = json!({"steps": [
            {"name": "s1", "actions": [{"action": "down", "content": "x"}]},
            {"name": "s2", "actions": [{"action": "up", "content": "y"}]}
        ]});

        run_orchestration(&h.context("wf"), fast(2), &input)
            .await
            .unwrap();
        let result = h.db.load("wf").unwrap().unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.steps[0].actions[0].attempt_count, 2);
        assert_eq!(result.steps[1].actions[0].attempt_count, 0);
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn rerun_replays_without_dispatching() {
        let h = Harness::new(DispatchMode::Sync);
        h.invoker
            .script("flaky", vec![Reply::fail(), Reply::ok(json!("done"))]);
        let input = json!({"steps": [{"name": "s1", "actions": [{"action": "flaky", "content": ""}]}]});

        run_orchestration(&h.context("wf"), fast(3), &input)
            .await
            .unwrap();
        let first = h.db.load("wf").unwrap().unwrap();
        let calls = h.invoker.calls_to("flaky");

        run_orchestration(&h.context("wf"), fast(3), &input)
            .await
            .unwrap();
        assert_eq!(h.db.load("wf").unwrap().unwrap(), first);
        assert_eq!(h.invoker.calls_to("flaky"), calls);
    }

    #[test]
    fn build_result_pads_missing_steps() {
        let payload = Payload::from_value(&json!({"steps": [
            {"name": "a", "actions": [{"action": "x", "content": ""}]},
            {"name": "b", "actions": [{"action": "y", "content": ""}, {"action": "z", "content": ""}]}
        ]}))
        .unwrap();
        let result = build_result("id", &payload, vec![], true);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].actions.len(), 2);
        assert!(!result.steps[1].actions[0].was_attempted());
    }
}
