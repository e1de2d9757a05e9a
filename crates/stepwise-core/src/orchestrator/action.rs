//! Data model for a processing run.
//!
//! A `Payload` is an ordered list of `Step`s; each step is a group of
//! `Action`s dispatched together. Every dispatch attempt produces an
//! `ActionOutcome`, which is folded into the `ActionResult` recorded for that
//! action. A run ends with exactly one `ProcessingResult`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Action / Step / Payload
// ---------------------------------------------------------------------------

/// A single unit of work: which service handles it and what to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Names the processing service (sync) or topic (async).
    #[serde(rename = "action")]
    pub kind: String,
    pub content: String,
}

impl Action {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }
}

/// A named group of actions run concurrently. Action indices are stable and
/// correlate results back to inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub steps: Vec<Step>,
}

impl Payload {
    /// Parse the external payload document.
    ///
    /// Shape: `{"steps": [{"name": str, "actions": [{"action": str, "content": str}]}]}`.
    /// Any deviation is reported as `MalformedPayload`.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(malformed("payload must be a JSON object"));
        }
        let payload: Payload =
            serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;

        for step in &payload.steps {
            if step.actions.is_empty() {
                return Err(malformed(format!("step '{}' has no actions", step.name)));
            }
            if let Some(bad) = step.actions.iter().find(|a| !is_valid_target(&a.kind)) {
                return Err(malformed(format!(
                    "step '{}': action '{}' is not a valid service or topic name",
                    step.name, bad.kind
                )));
            }
        }
        Ok(payload)
    }

    pub fn action_count(&self) -> usize {
        self.steps.iter().map(|s| s.actions.len()).sum()
    }
}

fn malformed(msg: impl Into<String>) -> EngineError {
    EngineError::MalformedPayload(msg.into())
}

/// Action kinds become a single URL path segment (service id or topic), so
/// they are limited to ASCII alphanumerics and `-`, `_`, `.`, and may not be
/// a relative path segment.
pub fn is_valid_target(kind: &str) -> bool {
    !kind.is_empty()
        && kind != "."
        && kind != ".."
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

/// Outcome of one dispatch attempt.
///
/// `correlation_token` is set only for asynchronous dispatches that were
/// accepted but whose real result has not arrived yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub succeeded: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub correlation_token: Option<String>,
}

impl ActionOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            succeeded: true,
            result: Some(result),
            error: None,
            correlation_token: None,
        }
    }

    /// A failed attempt. `result` carries the error document recorded for
    /// the action if this turns out to be its final attempt.
    pub fn failure(error: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            succeeded: false,
            result,
            error: Some(error.into()),
            correlation_token: None,
        }
    }

    /// Accepted asynchronous dispatch awaiting its correlated event.
    pub fn accepted(correlation_token: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            result: None,
            error: None,
            correlation_token: Some(correlation_token.into()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.succeeded && self.correlation_token.is_some()
    }

    /// Whether this outcome counts as a failed attempt: explicit failure, a
    /// missing result, or an error-shaped result.
    pub fn is_failure(&self) -> bool {
        if !self.succeeded {
            return true;
        }
        match &self.result {
            None => true,
            Some(v) => is_error_shaped(v),
        }
    }
}

/// A response is error-shaped when it is an object carrying an `error` key.
pub fn is_error_shaped(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| o.contains_key("error"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Final recorded outcome of an action. `attempt_count == 0` means the action
/// never ran because an earlier step failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(flatten)]
    pub action: Action,
    pub result: Option<Value>,
    pub attempt_count: u32,
}

impl ActionResult {
    pub fn new(action: Action, result: Option<Value>, attempt_count: u32) -> Self {
        Self {
            action,
            result,
            attempt_count,
        }
    }

    pub fn unattempted(action: &Action) -> Self {
        Self::new(action.clone(), None, 0)
    }

    pub fn was_attempted(&self) -> bool {
        self.attempt_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub actions: Vec<ActionResult>,
}

impl StepResult {
    pub fn unattempted(step: &Step) -> Self {
        Self {
            name: step.name.clone(),
            actions: step.actions.iter().map(ActionResult::unattempted).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

/// The single persisted artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub id: String,
    pub status: RunStatus,
    pub steps: Vec<StepResult>,
}
