//! Step orchestration core.
//!
//! Provides the payload data model (`action`), the per-instance bookkeeping
//! (`instance`), the redb journal and result store (`db`), the replay-aware
//! `OrchestrationContext`, correlated event delivery, the retry controller,
//! the step executor and the orchestrator that sequences steps into one
//! `ProcessingResult`.

pub mod action;
pub mod context;
pub mod correlation;
pub mod db;
pub mod instance;
pub mod retry;
pub mod step;
pub mod workflow;

pub use action::{
    Action, ActionOutcome, ActionResult, Payload, ProcessingResult, RunStatus, Step, StepResult,
};
pub use context::OrchestrationContext;
pub use correlation::{CorrelatedEvent, EventHub};
pub use db::{EngineDb, ResultStore};
pub use instance::{InstanceRecord, OrchestrationState, RuntimeStatus};
pub use retry::RetryPolicy;
pub use workflow::{run_orchestration, WORKFLOW_DONE};
