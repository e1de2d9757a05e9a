//! Matching of externally raised completion events to waiting actions.
//!
//! Asynchronous dispatches return a correlation token; the real result
//! arrives later as a `CorrelatedEvent` carrying the same token. Events are
//! journaled before waiters are woken, so an event that arrives before its
//! wait is registered (or before a restart) is still delivered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

use super::action::{is_error_shaped, ActionOutcome};
use super::db::EngineDb;

/// Completion event for an asynchronously dispatched action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedEvent {
    pub instance_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub response: Value,
}

impl CorrelatedEvent {
    /// Fold the event into the outcome of the action it completes.
    pub fn into_outcome(self) -> ActionOutcome {
        if self.response.is_null() {
            return ActionOutcome::failure("completion event carried no response", None);
        }
        if is_error_shaped(&self.response) {
            let error = format!("processing failed: {}", self.response["error"]);
            return ActionOutcome::failure(error, Some(self.response));
        }
        ActionOutcome::success(self.response)
    }
}

type WaiterKey = (String, String);

/// Routes raised events to waiters keyed by `(instance_id, correlation_id)`.
pub struct EventHub {
    db: Arc<EngineDb>,
    waiters: Mutex<HashMap<WaiterKey, Vec<oneshot::Sender<CorrelatedEvent>>>>,
}

impl EventHub {
    pub fn new(db: Arc<EngineDb>) -> Self {
        Self {
            db,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Journal `event` and wake anyone waiting on it. Returns `false` when an
    /// event for the same token was already delivered; the duplicate is dropped.
    pub fn raise(&self, event: CorrelatedEvent) -> Result<bool> {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.db.record_event(&event)? {
            warn!(
                instance_id = %event.instance_id,
                correlation_id = %event.correlation_id,
                "duplicate completion event ignored"
            );
            return Ok(false);
        }

        let key = (event.instance_id.clone(), event.correlation_id.clone());
        match waiters.remove(&key) {
            Some(senders) => {
                for tx in senders {
                    let _ = tx.send(event.clone());
                }
            }
            None => debug!(
                instance_id = %event.instance_id,
                correlation_id = %event.correlation_id,
                "completion event buffered until its wait starts"
            ),
        }
        Ok(true)
    }

    /// Suspend until the event for `correlation_id` is delivered. There is no
    /// timeout: an event that never arrives leaves the caller suspended.
    pub async fn wait(&self, instance_id: &str, correlation_id: &str) -> Result<CorrelatedEvent> {
        let rx = {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(event) = self.db.event(instance_id, correlation_id)? {
                return Ok(event);
            }
            let (tx, rx) = oneshot::channel();
            waiters
                .entry((instance_id.to_string(), correlation_id.to_string()))
                .or_default()
                .push(tx);
            rx
        };
        rx.await.map_err(|_| {
            EngineError::Orchestration(format!(
                "event hub closed while waiting for '{correlation_id}'"
            ))
        })
    }

    /// Number of registered waits; used for diagnostics.
    pub fn pending_waits(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn hub() -> (TempDir, Arc<EventHub>) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(EngineDb::open(&dir.path().join("hub.db")).unwrap());
        (dir, Arc::new(EventHub::new(db)))
    }

    fn event(token: &str, response: Value) -> CorrelatedEvent {
        CorrelatedEvent {
            instance_id: "wf".into(),
            correlation_id: token.into(),
            response,
        }
    }

    #[tokio::test]
    async fn wait_then_raise_delivers() {
        let (_dir, hub) = hub();
        let waiter = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait("wf", "t1").await })
        };
        while hub.pending_waits() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(hub.raise(event("t1", json!({"ok": true}))).unwrap());

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.response, json!({"ok": true}));
        assert_eq!(hub.pending_waits(), 0);
    }

    #[tokio::test]
    async fn raise_before_wait_is_buffered() {
        let (_dir, hub) = hub();
        hub.raise(event("t1", json!({"early": true}))).unwrap();
        let got = hub.wait("wf", "t1").await.unwrap();
        assert_eq!(got.response, json!({"early": true}));
    }

    #[tokio::test]
    async fn events_are_matched_by_token_not_order() {
        let (_dir, hub) = hub();
        hub.raise(event("t2", json!(2))).unwrap();
        hub.raise(event("t1", json!(1))).unwrap();
        assert_eq!(hub.wait("wf", "t1").await.unwrap().response, json!(1));
        assert_eq!(hub.wait("wf", "t2").await.unwrap().response, json!(2));
    }

    #[tokio::test]
    async fn duplicate_event_is_ignored() {
        let (_dir, hub) = hub();
        assert!(hub.raise(event("t1", json!({"first": true}))).unwrap());
        assert!(!hub.raise(event("t1", json!({"second": true}))).unwrap());
        let got = hub.wait("wf", "t1").await.unwrap();
        assert_eq!(got.response, json!({"first": true}));
    }

    #[test]
    fn event_outcome_folding() {
        let ok = event("t", json!({"ok": true})).into_outcome();
        assert!(!ok.is_failure());
        assert_eq!(ok.result, Some(json!({"ok": true})));

        let err = event("t", json!({"error": "bad", "status_code": 500})).into_outcome();
        assert!(err.is_failure());
        assert_eq!(err.result, Some(json!({"error": "bad", "status_code": 500})));

        let empty = event("t", Value::Null).into_outcome();
        assert!(empty.is_failure());
        assert!(empty.result.is_none());
    }
}
