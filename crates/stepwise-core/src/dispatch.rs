//! Turning an `Action` into a call against a processing service.
//!
//! Transport failures and non-success responses never escape as errors:
//! they are folded into the returned `ActionOutcome` so retry policy stays
//! with the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::DispatchMode;
use crate::orchestrator::action::{Action, ActionOutcome};

// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Raw response from a synchronous service invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse {
    pub status: u16,
    pub body: String,
}

impl InvokeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

/// Message published for asynchronous processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub instance_id: String,
    pub correlation_id: String,
    pub content: String,
}

#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    async fn invoke(
        &self,
        target: &str,
        correlation_id: &str,
        content: &str,
    ) -> Result<InvokeResponse, TransportError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, request: &PublishRequest) -> Result<(), TransportError>;
}

/// Correlation id for the task with sequence number `seq`.
pub fn correlation_id(instance_id: &str, seq: u64) -> String {
    format!("{instance_id}-{seq}")
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    mode: DispatchMode,
    invoker: Arc<dyn ServiceInvoker>,
    publisher: Arc<dyn EventPublisher>,
}

impl Dispatcher {
    pub fn new(
        mode: DispatchMode,
        invoker: Arc<dyn ServiceInvoker>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            mode,
            invoker,
            publisher,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Same collaborators, different dispatch mode.
    pub fn with_mode(&self, mode: DispatchMode) -> Self {
        Self {
            mode,
            invoker: self.invoker.clone(),
            publisher: self.publisher.clone(),
        }
    }

    /// Dispatch one attempt of `action` as task `seq` of `instance_id`.
    pub async fn dispatch(&self, instance_id: &str, seq: u64, action: &Action) -> ActionOutcome {
        let correlation_id = correlation_id(instance_id, seq);
        info!(
            instance_id,
            seq,
            action = %action.kind,
            mode = self.mode.as_str(),
            "dispatching action"
        );
        match self.mode {
            DispatchMode::Sync => self.dispatch_sync(&correlation_id, action).await,
            DispatchMode::Async => {
                self.dispatch_async(instance_id, &correlation_id, action)
                    .await
            }
        }
    }

    async fn dispatch_sync(&self, correlation_id: &str, action: &Action) -> ActionOutcome {
        let resp = match self
            .invoker
            .invoke(&action.kind, correlation_id, &action.content)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                error!(correlation_id, action = %action.kind, error = %e, "invoke failed");
                return ActionOutcome::failure(e.0.clone(), Some(json!({ "error": e.0 })));
            }
        };

        if resp.is_success() {
            info!(correlation_id, status = resp.status, "invoke completed");
            return ActionOutcome::success(json_or_text(&resp.body));
        }

        if resp.is_rate_limited() {
            warn!(correlation_id, action = %action.kind, body = %resp.body, "invoke rate limited");
        } else {
            error!(
                correlation_id,
                action = %action.kind,
                status = resp.status,
                body = %resp.body,
                "invoke returned an error status"
            );
        }
        ActionOutcome::failure(
            format!("{}: {}", resp.status, resp.body),
            Some(json!({
                "error": json_or_text(&resp.body),
                "status_code": resp.status,
            })),
        )
    }

    async fn dispatch_async(
        &self,
        instance_id: &str,
        correlation_id: &str,
        action: &Action,
    ) -> ActionOutcome {
        let request = PublishRequest {
            instance_id: instance_id.to_string(),
            correlation_id: correlation_id.to_string(),
            content: action.content.clone(),
        };
        match self.publisher.publish(&action.kind, &request).await {
            Ok(()) => {
                info!(correlation_id, topic = %action.kind, "published");
                ActionOutcome::accepted(correlation_id)
            }
            Err(e) => {
                error!(correlation_id, topic = %action.kind, error = %e, "publish failed");
                ActionOutcome::failure(e.0.clone(), Some(json!({ "error": e.0 })))
            }
        }
    }
}

/// Parse `body` as JSON, falling back to the raw text as a JSON string.
fn json_or_text(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
