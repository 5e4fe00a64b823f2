//! Configuration surface consumed by the sync and context subsystems

use serde::{Deserialize, Serialize};

use crate::sync::ConflictPolicy;
use crate::context::CompressionStrategy;

/// Configuration for the distributed memory manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Stable node id; empty means generate one at startup
    pub node_id: String,
    /// Topic carrying memory replication events
    pub memory_events_topic: String,
    /// Conflict resolution policy name (e.g. "merge_all")
    pub conflict_policy: ConflictPolicy,
    /// Base delay for consumer resubscribe backoff, in milliseconds
    pub backoff_base_ms: u64,
    /// Upper bound for consumer resubscribe backoff, in milliseconds
    pub backoff_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            memory_events_topic: crate::types::TOPIC_MEMORY_EVENTS.to_string(),
            conflict_policy: ConflictPolicy::MergeAll,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Configuration for the infinite context engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Topic carrying conversation lifecycle events
    pub conversations_topic: String,
    /// Topic carrying debate completion facts
    pub debates_topic: String,
    /// Default token budget when callers do not supply one
    pub default_max_tokens: i64,
    /// Default compression strategy
    pub default_strategy: CompressionStrategy,
    /// Maximum cached conversations
    pub cache_max_size: usize,
    /// Cache entry time-to-live in seconds
    pub cache_ttl_secs: u64,
    /// Entities below this confidence are dropped during reconstruction
    pub min_entity_confidence: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            conversations_topic: crate::types::TOPIC_CONVERSATIONS.to_string(),
            debates_topic: crate::types::TOPIC_DEBATES_COMPLETED.to_string(),
            default_max_tokens: 128_000,
            default_strategy: CompressionStrategy::Hybrid,
            cache_max_size: 100,
            cache_ttl_secs: 30 * 60,
            min_entity_confidence: 0.5,
        }
    }
}
