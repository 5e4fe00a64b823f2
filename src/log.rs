//! Append-only replicated event log
//!
//! The log never reorders or deletes events; consumers are responsible for
//! idempotent application. In production the log rides a topic-partitioned
//! broker; [`InMemoryEventLog`] satisfies the same read contracts in-process.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::types::MemoryEvent;

/// Append and query access to the replicated event log
pub trait EventLog: Send + Sync {
    /// Append an event; the log preserves arrival order
    fn append(&self, event: MemoryEvent) -> Result<()>;

    /// Events for one memory, in log order
    fn events_for_memory(&self, memory_id: &str) -> Result<Vec<MemoryEvent>>;

    /// Events at or after a timestamp, in log order
    fn events_since(&self, timestamp: DateTime<Utc>) -> Result<Vec<MemoryEvent>>;

    /// Events for one user, in log order
    fn events_for_user(&self, user_id: &str) -> Result<Vec<MemoryEvent>>;

    /// Events produced by one node, in log order
    fn events_from_node(&self, node_id: &str) -> Result<Vec<MemoryEvent>>;

    /// Total number of recorded events
    fn len(&self) -> usize;

    /// Whether the log is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered in-process event log
pub struct InMemoryEventLog {
    events: Mutex<Vec<MemoryEvent>>,
}

impl InMemoryEventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn filter(&self, predicate: impl Fn(&MemoryEvent) -> bool) -> Vec<MemoryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, event: MemoryEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    fn events_for_memory(&self, memory_id: &str) -> Result<Vec<MemoryEvent>> {
        Ok(self.filter(|e| e.memory_id == memory_id))
    }

    fn events_since(&self, timestamp: DateTime<Utc>) -> Result<Vec<MemoryEvent>> {
        Ok(self.filter(|e| e.timestamp >= timestamp))
    }

    fn events_for_user(&self, user_id: &str) -> Result<Vec<MemoryEvent>> {
        Ok(self.filter(|e| e.user_id == user_id))
    }

    fn events_from_node(&self, node_id: &str) -> Result<Vec<MemoryEvent>> {
        Ok(self.filter(|e| e.node_id == node_id))
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }
}
