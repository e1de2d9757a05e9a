//! In-process host for orchestration instances.
//!
//! `Engine` owns the journal, the dispatcher and the event hub. Each started
//! instance runs as its own tokio task; instances share nothing but the
//! database, and each touches only its own keys.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, Result};
use crate::orchestrator::action::{Payload, ProcessingResult};
use crate::orchestrator::context::OrchestrationContext;
use crate::orchestrator::correlation::{CorrelatedEvent, EventHub};
use crate::orchestrator::db::{EngineDb, ResultStore};
use crate::orchestrator::instance::{
    InstanceRecord, OrchestrationState, RunSettings, RuntimeStatus,
};
use crate::orchestrator::retry::RetryPolicy;
use crate::orchestrator::workflow::run_orchestration;
use crate::sidecar::SidecarClient;

/// Observable status of an instance that has no persisted result yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub runtime_status: RuntimeStatus,
    pub state: Option<OrchestrationState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&InstanceRecord> for InstanceStatus {
    fn from(r: &InstanceRecord) -> Self {
        Self {
            instance_id: r.id.clone(),
            runtime_status: r.runtime_status,
            state: r.state,
            created_at: r.created_at,
            updated_at: r.updated_at,
            error: r.error.clone(),
        }
    }
}

/// Answer to `query`: the final result once persisted, the status before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Result(ProcessingResult),
    Status(InstanceStatus),
}

pub struct Engine {
    db: Arc<EngineDb>,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<EventHub>,
    policy: RetryPolicy,
}

impl Engine {
    pub fn new(db: Arc<EngineDb>, dispatcher: Arc<Dispatcher>, policy: RetryPolicy) -> Self {
        let hub = Arc::new(EventHub::new(db.clone()));
        Self {
            db,
            dispatcher,
            hub,
            policy,
        }
    }

    /// Open the database under `root` and wire dispatch through the sidecar.
    pub fn from_config(root: &Path, config: &EngineConfig) -> Result<Self> {
        config.ensure_valid()?;
        let db = Arc::new(EngineDb::open(&config.db_path(root))?);
        let sidecar = Arc::new(SidecarClient::new(&config.sidecar));
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatch.mode,
            sidecar.clone(),
            sidecar,
        ));
        Ok(Self::new(
            db,
            dispatcher,
            RetryPolicy::from_config(&config.retry),
        ))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Settings new instances are started under.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            retry: self.policy,
            dispatch_mode: self.dispatcher.mode(),
        }
    }

    /// Begin a new instance for `input` and return its id. A malformed
    /// payload is rejected before anything is recorded.
    pub fn start(self: &Arc<Self>, input: Value) -> Result<String> {
        let payload = Payload::from_value(&input)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .insert_instance(&InstanceRecord::new(&id, input).with_settings(self.settings()))?;
        info!(
            instance_id = %id,
            steps = payload.steps.len(),
            mode = self.dispatcher.mode().as_str(),
            "instance scheduled"
        );
        self.spawn(id.clone());
        Ok(id)
    }

    pub fn query(&self, instance_id: &str) -> Result<QueryResponse> {
        if let Some(result) = self.db.load(instance_id)? {
            return Ok(QueryResponse::Result(result));
        }
        let record = self
            .db
            .get_instance(instance_id)?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))?;
        Ok(QueryResponse::Status(InstanceStatus::from(&record)))
    }

    /// Deliver a completion event. Returns `false` for a duplicate.
    pub fn raise_event(&self, event: CorrelatedEvent) -> Result<bool> {
        let record = self
            .db
            .get_instance(&event.instance_id)?
            .ok_or_else(|| EngineError::InstanceNotFound(event.instance_id.clone()))?;
        if record.runtime_status.is_terminal() {
            return Err(EngineError::InstanceNotRunning {
                id: record.id,
                status: record.runtime_status.as_str().to_string(),
            });
        }
        self.hub.raise(event)
    }

    /// All instances, newest first.
    pub fn list(&self) -> Result<Vec<InstanceStatus>> {
        Ok(self
            .db
            .list_instances()?
            .iter()
            .map(InstanceStatus::from)
            .collect())
    }

    /// Resume every instance still marked `Running`. Call once at startup,
    /// before any new instance is started.
    pub fn resume_incomplete(self: &Arc<Self>) -> Result<usize> {
        let pending: Vec<String> = self
            .db
            .list_instances()?
            .into_iter()
            .filter(|r| r.runtime_status == RuntimeStatus::Running)
            .map(|r| r.id)
            .collect();
        for id in &pending {
            info!(instance_id = %id, "resuming instance");
            self.spawn(id.clone());
        }
        Ok(pending.len())
    }

    /// Poll until `instance_id` reaches a terminal status.
    pub async fn wait_for_completion(
        &self,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<InstanceRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self
                .db
                .get_instance(instance_id)?
                .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))?;
            if record.runtime_status.is_terminal() {
                return Ok(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Orchestration(format!(
                    "timed out waiting for instance '{instance_id}'"
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn spawn(self: &Arc<Self>, id: String) {
        let engine = self.clone();
        tokio::spawn(async move { engine.drive(id).await });
    }

    async fn drive(self: Arc<Self>, id: String) {
        let outcome = self.run_instance(&id).await;
        let update = self.db.update_instance(&id, |r| match &outcome {
            Ok(output) => {
                r.runtime_status = RuntimeStatus::Completed;
                r.output = Some(output.clone());
            }
            Err(e) => {
                r.runtime_status = RuntimeStatus::Failed;
                r.error = Some(e.to_string());
            }
        });
        match (&outcome, update) {
            (Ok(_), Ok(_)) => info!(instance_id = %id, "instance completed"),
            (Err(e), Ok(_)) => error!(instance_id = %id, error = %e, "instance failed"),
            (_, Err(e)) => warn!(instance_id = %id, error = %e, "could not record instance outcome"),
        }
    }

    async fn run_instance(&self, id: &str) -> Result<String> {
        let record = self
            .db
            .get_instance(id)?
            .ok_or_else(|| EngineError::InstanceNotFound(id.to_string()))?;
        let settings = record.settings.unwrap_or_else(|| self.settings());
        let dispatcher = if settings.dispatch_mode == self.dispatcher.mode() {
            self.dispatcher.clone()
        } else {
            Arc::new(self.dispatcher.with_mode(settings.dispatch_mode))
        };
        let ctx = OrchestrationContext::new(
            id,
            self.db.clone(),
            dispatcher,
            self.hub.clone(),
            self.db.clone(),
        )?;
        run_orchestration(&ctx, settings.retry, &record.input).await
    }
}
