//! The context object handed to orchestration code.
//!
//! Every activity (dispatch, persist) and every delay is assigned a task
//! sequence number in program order. Once an activity completes its output is
//! journaled under that number; re-running the same orchestration code
//! against the same history returns the recorded output instead of calling
//! out again. Sequence numbers must therefore be allocated deterministically:
//! callers create activity futures in a stable order before awaiting them.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::dispatch::Dispatcher;
use crate::error::{EngineError, Result};

use super::action::{Action, ActionOutcome, ProcessingResult};
use super::correlation::{CorrelatedEvent, EventHub};
use super::db::{EngineDb, HistoryEntry, ResultStore};
use super::instance::OrchestrationState;

pub struct OrchestrationContext {
    instance_id: String,
    db: Arc<EngineDb>,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<EventHub>,
    results: Arc<dyn ResultStore>,
    next_seq: AtomicU64,
    /// Highest sequence number present in history when the context was built.
    replay_horizon: Option<u64>,
}

impl OrchestrationContext {
    pub fn new(
        instance_id: impl Into<String>,
        db: Arc<EngineDb>,
        dispatcher: Arc<Dispatcher>,
        hub: Arc<EventHub>,
        results: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        let instance_id = instance_id.into();
        let replay_horizon = db.history(&instance_id)?.last().map(|(seq, _)| *seq);
        Ok(Self {
            instance_id,
            db,
            dispatcher,
            hub,
            results,
            next_seq: AtomicU64::new(0),
            replay_horizon,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// True while execution is still re-walking recorded history.
    pub fn is_replaying(&self) -> bool {
        match self.replay_horizon {
            Some(horizon) => self.next_seq.load(Ordering::SeqCst) <= horizon,
            None => false,
        }
    }

    fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Run `work` as a journaled activity. The sequence number is taken now,
    /// not when the returned future is first polled.
    fn call_activity<'a, T, F, Fut>(
        &'a self,
        name: &'static str,
        work: F,
    ) -> impl Future<Output = Result<T>> + Send + 'a
    where
        T: Serialize + DeserializeOwned + Send + 'a,
        F: FnOnce(u64) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a,
    {
        let seq = self.allocate_seq();
        async move {
            match self.db.history_entry(&self.instance_id, seq)? {
                Some(HistoryEntry::ActivityCompleted { name: recorded, output }) => {
                    if recorded != name {
                        return Err(non_deterministic(seq, name, &recorded));
                    }
                    return Ok(serde_json::from_value(output)?);
                }
                Some(HistoryEntry::Timer { .. }) => {
                    return Err(non_deterministic(seq, name, "timer"));
                }
                None => {}
            }

            let value = work(seq).await?;
            let entry = HistoryEntry::ActivityCompleted {
                name: name.to_string(),
                output: serde_json::to_value(&value)?,
            };
            self.db.record_history(&self.instance_id, seq, &entry)?;
            Ok(value)
        }
    }

    /// Dispatch one attempt of `action`.
    pub fn dispatch<'a>(
        &'a self,
        action: &Action,
    ) -> impl Future<Output = Result<ActionOutcome>> + Send + 'a {
        let action = action.clone();
        let dispatcher = self.dispatcher.clone();
        let instance_id = self.instance_id.clone();
        self.call_activity("dispatch", move |seq| async move {
            Ok(dispatcher.dispatch(&instance_id, seq, &action).await)
        })
    }

    /// Suspend until the completion event for `correlation_id` arrives.
    pub async fn await_event(&self, correlation_id: &str) -> Result<CorrelatedEvent> {
        self.hub.wait(&self.instance_id, correlation_id).await
    }

    /// Write the final result through the result store, keyed by instance id.
    pub async fn persist(&self, result: &ProcessingResult) -> Result<()> {
        let results = self.results.clone();
        let key = self.instance_id.clone();
        let result = result.clone();
        self.call_activity("persist", move |_| async move { results.save(&key, &result) })
            .await
    }

    /// Durable delay. The fire time is fixed the first time this delay is
    /// reached; on replay only the remaining time (if any) is waited.
    pub async fn schedule_delay(&self, delay: Duration) -> Result<()> {
        let seq = self.allocate_seq();
        let fire_at = match self.db.history_entry(&self.instance_id, seq)? {
            Some(HistoryEntry::Timer { fired: true, .. }) => return Ok(()),
            Some(HistoryEntry::Timer { fire_at, .. }) => fire_at,
            Some(HistoryEntry::ActivityCompleted { name, .. }) => {
                return Err(non_deterministic(seq, "timer", &name));
            }
            None => {
                let delay = chrono::Duration::from_std(delay)
                    .map_err(|e| EngineError::Orchestration(e.to_string()))?;
                let fire_at = Utc::now() + delay;
                self.db.record_history(
                    &self.instance_id,
                    seq,
                    &HistoryEntry::Timer {
                        fire_at,
                        fired: false,
                    },
                )?;
                fire_at
            }
        };

        if let Ok(remaining) = (fire_at - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
        self.db.record_history(
            &self.instance_id,
            seq,
            &HistoryEntry::Timer {
                fire_at,
                fired: true,
            },
        )
    }

    /// Publish the state machine position for observers. Not journaled.
    pub fn set_state(&self, state: OrchestrationState) -> Result<()> {
        self.db
            .update_instance(&self.instance_id, |r| r.state = Some(state))?;
        Ok(())
    }
}

fn non_deterministic(seq: u64, expected: &str, recorded: &str) -> EngineError {
    EngineError::Orchestration(format!(
        "non-deterministic replay at task {seq}: expected {expected}, history has {recorded}"
    ))
}
