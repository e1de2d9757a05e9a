//! Scripted collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use crate::config::DispatchMode;
use crate::dispatch::{
    Dispatcher, EventPublisher, InvokeResponse, PublishRequest, ServiceInvoker, TransportError,
};
use crate::orchestrator::context::OrchestrationContext;
use crate::orchestrator::correlation::EventHub;
use crate::orchestrator::db::EngineDb;
use crate::orchestrator::instance::InstanceRecord;

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Transport(String),
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Status(200, body.to_string())
    }

    pub fn fail() -> Self {
        Reply::Status(500, r#"{"reason":"unavailable"}"#.to_string())
    }
}

/// Replies per target in order; the last reply repeats once the script runs
/// out. Unscripted targets answer 404.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, target: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(target.to_string(), replies.into());
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, target: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == target)
            .count()
    }
}

#[async_trait]
impl ServiceInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        target: &str,
        correlation_id: &str,
        content: &str,
    ) -> Result<InvokeResponse, TransportError> {
        self.calls.lock().unwrap().push((
            target.to_string(),
            correlation_id.to_string(),
            content.to_string(),
        ));
        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(target) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(Reply::Status(status, body)) => Ok(InvokeResponse { status, body }),
            Some(Reply::Transport(msg)) => Err(TransportError(msg)),
            None => Ok(InvokeResponse {
                status: 404,
                body: format!("no service '{target}'"),
            }),
        }
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    failing: HashSet<String>,
    published: Mutex<Vec<(String, PublishRequest)>>,
}

impl RecordingPublisher {
    pub fn failing<const N: usize>(topics: [&str; N]) -> Self {
        Self {
            failing: topics.iter().map(|t| t.to_string()).collect(),
            published: Mutex::default(),
        }
    }

    pub fn published(&self) -> Vec<(String, PublishRequest)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, request: &PublishRequest) -> Result<(), TransportError> {
        if self.failing.contains(topic) {
            return Err(TransportError(format!("topic '{topic}' unavailable")));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), request.clone()));
        Ok(())
    }
}

/// Everything needed to run orchestration code against fakes.
pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<EngineDb>,
    pub hub: Arc<EventHub>,
    pub invoker: Arc<ScriptedInvoker>,
    pub publisher: Arc<RecordingPublisher>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new(mode: DispatchMode) -> Self {
        Self::with_publisher(mode, RecordingPublisher::default())
    }

    pub fn with_publisher(mode: DispatchMode, publisher: RecordingPublisher) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(EngineDb::open(&dir.path().join("engine.db")).unwrap());
        let hub = Arc::new(EventHub::new(db.clone()));
        let invoker = Arc::new(ScriptedInvoker::new());
        let publisher = Arc::new(publisher);
        let dispatcher = Arc::new(Dispatcher::new(mode, invoker.clone(), publisher.clone()));
        Self {
            dir,
            db,
            hub,
            invoker,
            publisher,
            dispatcher,
        }
    }

    /// Context for `instance_id`, creating its instance record on first use.
    pub fn context(&self, instance_id: &str) -> OrchestrationContext {
        if self.db.get_instance(instance_id).unwrap().is_none() {
            self.db
                .insert_instance(&InstanceRecord::new(instance_id, Value::Null))
                .unwrap();
        }
        OrchestrationContext::new(
            instance_id,
            self.db.clone(),
            self.dispatcher.clone(),
            self.hub.clone(),
            self.db.clone(),
        )
        .unwrap()
    }
}
