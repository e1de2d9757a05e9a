//! Per-instance bookkeeping kept by the runtime host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DispatchMode;

use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// OrchestrationState
// ---------------------------------------------------------------------------

/// Position of an instance in the orchestrator state machine.
///
/// Transitions: `Running(i) → Running(i+1) → … → Finalizing → Done`, or
/// `Running(i) → StepFailed(i) → Finalizing → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationState {
    Running { step: usize },
    StepFailed { step: usize },
    Finalizing,
    Done,
}

impl OrchestrationState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: &OrchestrationState) -> bool {
        use OrchestrationState::*;
        match (self, next) {
            (Running { step: a }, Running { step: b }) => *b == a + 1,
            (Running { step: a }, StepFailed { step: b }) => a == b,
            (Running { .. }, Finalizing) => true,
            (StepFailed { .. }, Finalizing) => true,
            (Finalizing, Done) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeStatus
// ---------------------------------------------------------------------------

/// Substrate-level status of an instance.
///
/// `Failed` here means an orchestration fault (the run itself broke), not a
/// business failure; a run whose step failed still finishes `Completed` with
/// a `ProcessingResult` whose status is `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    Running,
    Completed,
    Failed,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

// ---------------------------------------------------------------------------
// RunSettings
// ---------------------------------------------------------------------------

/// Engine settings an instance was started under. Replay must fold the
/// journal with these, not with whatever the engine is configured with now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub retry: RetryPolicy,
    pub dispatch_mode: DispatchMode,
}

// ---------------------------------------------------------------------------
// InstanceRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    /// The payload document exactly as received; replayed on recovery.
    pub input: Value,
    pub runtime_status: RuntimeStatus,
    #[serde(default)]
    pub state: Option<OrchestrationState>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Absent on records written before settings were stored.
    #[serde(default)]
    pub settings: Option<RunSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            input,
            runtime_status: RuntimeStatus::Running,
            state: None,
            output: None,
            error: None,
            settings: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}
