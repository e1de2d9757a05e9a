//! Persistent storage for orchestration instances using redb.
//!
//! # Table design
//!
//! ```text
//! instances  id                                  -> InstanceRecord (JSON)
//! history    instance_id | 0x00 | seq: u64 (BE)  -> HistoryEntry (JSON)
//! events     instance_id | 0x00 | correlation_id -> CorrelatedEvent (JSON)
//! results    id                                  -> ProcessingResult (JSON)
//! ```
//!
//! The history key puts the task sequence number in big-endian after a NUL
//! separator, so a range scan over one instance's prefix returns its history
//! in sequence order.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

use super::action::ProcessingResult;
use super::correlation::CorrelatedEvent;
use super::instance::InstanceRecord;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
const HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("history");
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");
const RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("results");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn history_key(instance_id: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(instance_id.len() + 9);
    key.extend_from_slice(instance_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn history_bounds(instance_id: &str) -> (Vec<u8>, Vec<u8>) {
    (history_key(instance_id, 0), history_key(instance_id, u64::MAX))
}

fn event_key(instance_id: &str, correlation_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(instance_id.len() + correlation_id.len() + 1);
    key.extend_from_slice(instance_id.as_bytes());
    key.push(0);
    key.extend_from_slice(correlation_id.as_bytes());
    key
}

fn seq_from_key(key: &[u8]) -> Option<u64> {
    let tail: [u8; 8] = key.get(key.len().checked_sub(8)?..)?.try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

fn db_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

/// One recorded step of an instance's execution, keyed by task sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    /// An activity ran to completion; `output` is returned verbatim on replay.
    ActivityCompleted { name: String, output: Value },
    /// A durable delay. `fire_at` is fixed when first scheduled.
    Timer { fire_at: DateTime<Utc>, fired: bool },
}

// ---------------------------------------------------------------------------
// ResultStore
// ---------------------------------------------------------------------------

/// Durable single-key persistence of final results, keyed by instance id.
pub trait ResultStore: Send + Sync {
    fn save(&self, key: &str, result: &ProcessingResult) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<ProcessingResult>>;
}

// ---------------------------------------------------------------------------
// EngineDb
// ---------------------------------------------------------------------------

/// Persistent store for instance records, replay history, correlated events
/// and final results.
pub struct EngineDb {
    db: Database,
}

impl EngineDb {
    /// Open or create the redb database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(INSTANCES).map_err(db_err)?;
        wt.open_table(HISTORY).map_err(db_err)?;
        wt.open_table(EVENTS).map_err(db_err)?;
        wt.open_table(RESULTS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    // -- instances ----------------------------------------------------------

    pub fn insert_instance(&self, record: &InstanceRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(INSTANCES).map_err(db_err)?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(INSTANCES).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write an instance record in a single transaction.
    pub fn update_instance<F>(&self, id: &str, update: F) -> Result<InstanceRecord>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let record = {
            let mut table = wt.open_table(INSTANCES).map_err(db_err)?;
            let current = table.get(id).map_err(db_err)?.map(|v| v.value().to_vec());
            let mut record: InstanceRecord = match current {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => return Err(EngineError::InstanceNotFound(id.to_string())),
            };
            update(&mut record);
            record.updated_at = Utc::now();
            let value = serde_json::to_vec(&record)?;
            table.insert(id, value.as_slice()).map_err(db_err)?;
            record
        };
        wt.commit().map_err(db_err)?;
        Ok(record)
    }

    /// All instances, newest first.
    pub fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(INSTANCES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let record: InstanceRecord = serde_json::from_slice(v.value())?;
            result.push(record);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    // -- history ------------------------------------------------------------

    pub fn record_history(&self, instance_id: &str, seq: u64, entry: &HistoryEntry) -> Result<()> {
        let key = history_key(instance_id, seq);
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(HISTORY).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn history_entry(&self, instance_id: &str, seq: u64) -> Result<Option<HistoryEntry>> {
        let key = history_key(instance_id, seq);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(HISTORY).map_err(db_err)?;
        match table.get(key.as_slice()).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// An instance's recorded history in sequence order.
    pub fn history(&self, instance_id: &str) -> Result<Vec<(u64, HistoryEntry)>> {
        let (lower, upper) = history_bounds(instance_id);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(HISTORY).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(db_err)?
        {
            let (k, v) = entry.map_err(db_err)?;
            let seq = seq_from_key(k.value())
                .ok_or_else(|| EngineError::Store("corrupt history key".to_string()))?;
            result.push((seq, serde_json::from_slice(v.value())?));
        }
        Ok(result)
    }

    // -- events -------------------------------------------------------------

    /// Record a correlated event. Returns `false` if an event for the same
    /// correlation id was already recorded; the first one wins.
    pub fn record_event(&self, event: &CorrelatedEvent) -> Result<bool> {
        let key = event_key(&event.instance_id, &event.correlation_id);
        let value = serde_json::to_vec(event)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let inserted = {
            let mut table = wt.open_table(EVENTS).map_err(db_err)?;
            let exists = table.get(key.as_slice()).map_err(db_err)?.is_some();
            if !exists {
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(db_err)?;
            }
            !exists
        };
        wt.commit().map_err(db_err)?;
        Ok(inserted)
    }

    pub fn event(&self, instance_id: &str, correlation_id: &str) -> Result<Option<CorrelatedEvent>> {
        let key = event_key(instance_id, correlation_id);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(EVENTS).map_err(db_err)?;
        match table.get(key.as_slice()).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }
}

impl ResultStore for EngineDb {
    fn save(&self, key: &str, result: &ProcessingResult) -> Result<()> {
        let value = serde_json::to_vec(result)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(RESULTS).map_err(db_err)?;
            table.insert(key, value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<ProcessingResult>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RESULTS).map_err(db_err)?;
        match table.get(key).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::action::{Action, ActionResult, RunStatus, StepResult};
    use crate::orchestrator::instance::RuntimeStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, EngineDb) {
        let dir = TempDir::new().unwrap();
        let db = EngineDb::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn completed(name: &str, output: Value) -> HistoryEntry {
        HistoryEntry::ActivityCompleted {
            name: name.to_string(),
            output,
        }
    }

    #[test]
    fn insert_and_get_instance() {
        let (_dir, db) = open_tmp();
        let record = InstanceRecord::new("wf-1", json!({"steps": []}));
        db.insert_instance(&record).unwrap();

        let loaded = db.get_instance("wf-1").unwrap().unwrap();
        assert_eq!(loaded.id, "wf-1");
        assert_eq!(loaded.runtime_status, RuntimeStatus::Running);
        assert!(db.get_instance("missing").unwrap().is_none());
    }

    #[test]
    fn update_instance_applies_change() {
        let (_dir, db) = open_tmp();
        db.insert_instance(&InstanceRecord::new("wf-1", json!({})))
            .unwrap();
        let updated = db
            .update_instance("wf-1", |r| {
                r.runtime_status = RuntimeStatus::Completed;
                r.output = Some("workflow done".into());
            })
            .unwrap();
        assert_eq!(updated.runtime_status, RuntimeStatus::Completed);

        let loaded = db.get_instance("wf-1").unwrap().unwrap();
        assert_eq!(loaded.output.as_deref(), Some("workflow done"));
    }

    #[test]
    fn update_missing_instance_is_not_found() {
        let (_dir, db) = open_tmp();
        let err = db.update_instance("nope", |_| {}).unwrap_err();
        assert!(matches!(err, EngineError::InstanceNotFound(_)));
    }

    #[test]
    fn history_is_scoped_and_ordered() {
        let (_dir, db) = open_tmp();
        // Insert out of order, and interleave a second instance with a
        // longer id that shares a prefix.
        db.record_history("wf", 2, &completed("dispatch", json!(2)))
            .unwrap();
        db.record_history("wf", 0, &completed("dispatch", json!(0)))
            .unwrap();
        db.record_history("wf-2", 1, &completed("dispatch", json!("other")))
            .unwrap();
        db.record_history("wf", 1, &completed("dispatch", json!(1)))
            .unwrap();

        let history = db.history("wf").unwrap();
        let seqs: Vec<u64> = history.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(db.history("wf-2").unwrap().len(), 1);
    }

    #[test]
    fn history_entry_lookup() {
        let (_dir, db) = open_tmp();
        let entry = completed("persist", Value::Null);
        db.record_history("wf", 7, &entry).unwrap();
        assert_eq!(db.history_entry("wf", 7).unwrap(), Some(entry));
        assert_eq!(db.history_entry("wf", 8).unwrap(), None);
    }

    #[test]
    fn first_event_wins() {
        let (_dir, db) = open_tmp();
        let first = CorrelatedEvent {
            instance_id: "wf".into(),
            correlation_id: "wf-0".into(),
            response: json!({"ok": true}),
        };
        let second = CorrelatedEvent {
            response: json!({"ok": false}),
            ..first.clone()
        };
        assert!(db.record_event(&first).unwrap());
        assert!(!db.record_event(&second).unwrap());
        assert_eq!(db.event("wf", "wf-0").unwrap(), Some(first));
        assert_eq!(db.event("wf", "wf-1").unwrap(), None);
    }

    #[test]
    fn result_store_roundtrip() {
        let (_dir, db) = open_tmp();
        let result = ProcessingResult {
            id: "wf".into(),
            status: RunStatus::Completed,
            steps: vec![StepResult {
                name: "s1".into(),
                actions: vec![ActionResult::new(
                    Action::new("svcA", "x"),
                    Some(json!({"ok": true})),
                    1,
                )],
            }],
        };
        assert!(db.load("wf").unwrap().is_none());
        db.save("wf", &result).unwrap();
        assert_eq!(db.load("wf").unwrap(), Some(result));
    }

    #[test]
    fn list_instances_newest_first() {
        let (_dir, db) = open_tmp();
        let mut older = InstanceRecord::new("a", json!({}));
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        let newer = InstanceRecord::new("b", json!({}));
        db.insert_instance(&older).unwrap();
        db.insert_instance(&newer).unwrap();

        let ids: Vec<String> = db
            .list_instances()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/test.db");
        {
            let db = EngineDb::open(&path).unwrap();
            db.insert_instance(&InstanceRecord::new("wf", json!({})))
                .unwrap();
            db.record_history("wf", 0, &completed("dispatch", json!(1)))
                .unwrap();
        }
        let db = EngineDb::open(&path).unwrap();
        assert!(db.get_instance("wf").unwrap().is_some());
        assert_eq!(db.history("wf").unwrap().len(), 1);
    }
}
