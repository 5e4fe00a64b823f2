//! Local per-node memory store
//!
//! Each node owns its store exclusively; cross-node state flows only
//! through the event log. Writes to the same key are serialized, writes to
//! different keys proceed concurrently.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{MnemoError, Result};
use crate::types::Memory;

/// Storage capability for a node's local memories
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new memory
    async fn add(&self, memory: Memory) -> Result<()>;

    /// Fetch a memory by id
    async fn get(&self, id: &str) -> Result<Memory>;

    /// Replace an existing memory; errors if absent
    async fn update(&self, memory: Memory) -> Result<()>;

    /// Insert or replace, used when applying resolved remote state
    async fn upsert(&self, memory: Memory) -> Result<()>;

    /// Remove a memory; errors if absent
    async fn delete(&self, id: &str) -> Result<()>;

    /// All memories belonging to a user
    async fn search_by_user(&self, user_id: &str) -> Result<Vec<Memory>>;

    /// Number of stored memories
    async fn len(&self) -> usize;
}

/// Concurrent in-process store
///
/// DashMap shards give per-key write serialization without a global lock.
pub struct InMemoryStore {
    memories: DashMap<String, Memory>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            memories: DashMap::new(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(&self, memory: Memory) -> Result<()> {
        self.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Memory> {
        self.memories
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| MnemoError::NotFound(id.to_string()))
    }

    async fn update(&self, memory: Memory) -> Result<()> {
        let mut entry = self
            .memories
            .get_mut(&memory.id)
            .ok_or_else(|| MnemoError::NotFound(memory.id.clone()))?;
        let mut updated = memory;
        updated.updated_at = Utc::now();
        *entry = updated;
        Ok(())
    }

    async fn upsert(&self, memory: Memory) -> Result<()> {
        self.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.memories
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MnemoError::NotFound(id.to_string()))
    }

    async fn search_by_user(&self, user_id: &str) -> Result<Vec<Memory>> {
        let mut found: Vec<Memory> = self
            .memories
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn len(&self) -> usize {
        self.memories.len()
    }
}
