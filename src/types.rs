//! Core types for Mnemo

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a memory
pub type MemoryId = String;

/// Topic carrying memory replication events, keyed by memory id
pub const TOPIC_MEMORY_EVENTS: &str = "memory.events";

/// Topic carrying conversation lifecycle events
pub const TOPIC_CONVERSATIONS: &str = "conversations";

/// Topic carrying debate completion facts consumed to enrich context
pub const TOPIC_DEBATES_COMPLETED: &str = "debates.completed";

/// Header marking a sync-request event (not a state transition)
pub const HEADER_SYNC_REQUEST: &str = "sync_request";

/// A unit of recalled information, owned by the local store of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Globally unique identifier
    pub id: MemoryId,
    /// Owning user
    pub user_id: String,
    /// Session the memory was captured in
    #[serde(default)]
    pub session_id: String,
    /// Main content of the memory
    pub content: String,
    /// Embedding vector, if computed
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Importance score (0.0 - 1.0)
    #[serde(default)]
    pub importance: f32,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entities mentioned by the memory
    #[serde(default)]
    pub entities: Vec<MemoryEntity>,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Vector clock of the latest event applied to this memory
    #[serde(default)]
    pub vector_clock: HashMap<String, i64>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Create a memory with generated id and current timestamps
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: String::new(),
            content: content.into(),
            embedding: None,
            importance: 0.0,
            tags: Vec::new(),
            entities: Vec::new(),
            metadata: HashMap::new(),
            vector_clock: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An entity referenced by a memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntity {
    /// Entity identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Entity type (person, org, topic, ...)
    #[serde(default, rename = "type")]
    pub entity_type: String,
    /// Extraction confidence (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f32,
}

/// Kinds of memory state transitions
///
/// Unknown kinds deserialize to `Unknown` so rolling upgrades can ship new
/// event types without breaking older readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEventType {
    #[default]
    Created,
    Updated,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MemoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryEventType::Created => write!(f, "created"),
            MemoryEventType::Updated => write!(f, "updated"),
            MemoryEventType::Deleted => write!(f, "deleted"),
            MemoryEventType::Unknown => write!(f, "unknown"),
        }
    }
}

/// An immutable fact describing a memory state transition
///
/// Events are never mutated after publication; the replicated log of these
/// events is the single source of truth for cross-node state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Unique event id, used for idempotence and tracing
    pub event_id: String,
    /// Kind of transition
    pub event_type: MemoryEventType,
    /// Node that produced the event
    pub node_id: String,
    /// When the transition happened on the producing node
    pub timestamp: DateTime<Utc>,
    /// Memory the event applies to
    pub memory_id: MemoryId,
    /// Point-in-time copy of the mutated fields
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub importance: f32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<MemoryEntity>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Producing node's vector clock at publication time
    #[serde(default)]
    pub vector_clock: HashMap<String, i64>,
}

impl MemoryEvent {
    /// Build an event from a local mutation
    pub fn from_memory(
        event_type: MemoryEventType,
        node_id: &str,
        memory: &Memory,
        vector_clock: HashMap<String, i64>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            memory_id: memory.id.clone(),
            user_id: memory.user_id.clone(),
            session_id: memory.session_id.clone(),
            content: memory.content.clone(),
            embedding: memory.embedding.clone(),
            importance: memory.importance,
            tags: memory.tags.clone(),
            entities: memory.entities.clone(),
            metadata: memory.metadata.clone(),
            vector_clock,
        }
    }

    /// Build a delete event carrying only identity fields
    pub fn deletion(node_id: &str, memory_id: &str, user_id: &str, vector_clock: HashMap<String, i64>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: MemoryEventType::Deleted,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            memory_id: memory_id.to_string(),
            user_id: user_id.to_string(),
            session_id: String::new(),
            content: String::new(),
            embedding: None,
            importance: 0.0,
            tags: Vec::new(),
            entities: Vec::new(),
            metadata: HashMap::new(),
            vector_clock,
        }
    }
}

/// Stable identity of a running node, threaded through constructors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Create an identity from a configured id; empty ids get a generated UUID
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.is_empty() {
            Self::generate()
        } else {
            Self(id)
        }
    }

    /// Generate a fresh identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observability report for a node's replication state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    /// This node's id
    pub node_id: String,
    /// Whether the background consumer is running
    pub running: bool,
    /// Whether a broker is configured
    pub broker_configured: bool,
    /// Whether a conflict resolver is configured
    pub resolver_configured: bool,
    /// Number of distinct nodes observed in the vector clock
    pub node_count: usize,
    /// Approximate replication lag in milliseconds, if any remote event was applied
    pub replication_lag_ms: Option<i64>,
    /// Remote events applied so far
    pub events_applied: u64,
    /// Events dropped by echo suppression
    pub events_suppressed: u64,
    /// Conflicts detected while applying remote events
    pub conflicts_detected: u64,
    /// In-process subscribers to local mutations
    pub subscriber_count: usize,
    /// Events recorded in the log
    pub event_count: usize,
    /// Copy of the vector clock
    pub vector_clock: HashMap<String, i64>,
}
