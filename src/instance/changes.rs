use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::definition::LinkId;
use crate::model::{FlowStatus, LinkStatus, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

/// What changed on a flow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    TaskStatus { task_id: String, status: TaskStatus },
    TaskData { task_id: String, name: String, value: Value },
    LinkStatus { link_id: LinkId, status: LinkStatus },
    Attr { name: String, value: Value },
    FlowStatus { status: FlowStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: u64,
    pub instance_id: String,
    pub sub_flow_id: u32,
    pub chg_type: ChangeType,
    pub change: Change,
}

/// Destination of change records. Recording is fire-and-forget: a sink that
/// fails to persist logs the failure itself.
pub trait ChangeSink: Send + Sync + Debug {
    fn record(&self, record: &ChangeRecord);
}

/// Numbers the changes of one flow instance and forwards them to a sink.
#[derive(Debug)]
pub struct ChangeTracker {
    instance_id: String,
    seq: Mutex<u64>,
    sink: Arc<dyn ChangeSink>,
}

impl ChangeTracker {
    pub fn new(instance_id: &str, sink: Arc<dyn ChangeSink>) -> Self {
        Self::starting_at(instance_id, sink, 0)
    }

    /// A tracker continuing the numbering of a restored instance.
    pub fn starting_at(instance_id: &str, sink: Arc<dyn ChangeSink>, seq: u64) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            seq: Mutex::new(seq),
            sink,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The sequence number of the last recorded change.
    pub fn last_seq(&self) -> u64 {
        *self.seq.lock()
    }

    pub fn track(&self, sub_flow_id: u32, chg_type: ChangeType, change: Change) {
        // Held across `record` so sinks observe changes in sequence order.
        let mut seq = self.seq.lock();
        *seq += 1;
        let record = ChangeRecord {
            seq: *seq,
            instance_id: self.instance_id.clone(),
            sub_flow_id,
            chg_type,
            change,
        };
        self.sink.record(&record);
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryChangeSink {
    records: Mutex<Vec<ChangeRecord>>,
}

impl MemoryChangeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.records.lock().clone()
    }

    pub fn drain(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ChangeSink for MemoryChangeSink {
    fn record(&self, record: &ChangeRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Emits each record as a debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChangeSink;

impl ChangeSink for TracingChangeSink {
    fn record(&self, record: &ChangeRecord) {
        debug!(
            instance = %record.instance_id,
            seq = record.seq,
            sub_flow = record.sub_flow_id,
            chg_type = ?record.chg_type,
            change = ?record.change,
            "Change recorded"
        );
    }
}
