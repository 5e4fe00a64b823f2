//! Conflict resolution for remotely replicated memories
//!
//! The resolver is a pure function from (current local value, incoming
//! remote event) to the new local value. The default `MergeAll` policy is a
//! semilattice join: applying the same event twice is a no-op, and any two
//! nodes that observe the same set of events converge to the same state
//! regardless of arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Memory, MemoryEntity, MemoryEvent};

/// Conflict resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Field-wise join: no information is silently lost
    #[default]
    MergeAll,
    /// Whole-record last-writer-wins by event timestamp; equal timestamps
    /// fall back to the field-wise join so replicas still converge
    LastWriteWins,
    /// Higher importance wins, ties keep local
    Importance,
    /// Causal ordering by vector clock; concurrent events fall back to the
    /// field-wise join
    VectorClock,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::MergeAll => write!(f, "merge_all"),
            ConflictPolicy::LastWriteWins => write!(f, "last_write_wins"),
            ConflictPolicy::Importance => write!(f, "importance"),
            ConflictPolicy::VectorClock => write!(f, "vector_clock"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "merge_all" => Ok(ConflictPolicy::MergeAll),
            "last_write_wins" | "lww" => Ok(ConflictPolicy::LastWriteWins),
            "importance" => Ok(ConflictPolicy::Importance),
            "vector_clock" => Ok(ConflictPolicy::VectorClock),
            _ => Err(format!("Unknown conflict policy: {}", s)),
        }
    }
}

/// Application-supplied resolution function, overriding the policy
pub type CustomResolverFn = Arc<dyn Fn(&Memory, &MemoryEvent) -> Memory + Send + Sync>;

/// How two vector clocks relate causally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// The first clock happened before the second
    Before,
    /// The first clock happened after the second
    After,
    Equal,
    /// Neither dominates; the events are concurrent
    Concurrent,
}

/// Resolves incoming remote events against local state
#[derive(Clone)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    custom: Option<CustomResolverFn>,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictPolicy::MergeAll)
    }
}

impl ConflictResolver {
    /// Create a resolver with the given policy
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            custom: None,
        }
    }

    /// Install an application-supplied resolution function
    ///
    /// The function receives (local, remote event) whenever both exist and
    /// its result replaces the policy's. An absent local value still
    /// materializes the event directly.
    pub fn with_custom(mut self, custom: CustomResolverFn) -> Self {
        self.custom = Some(custom);
        self
    }

    /// The configured policy
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Produce the new local value for `event`
    ///
    /// An absent local value materializes the event as a fresh memory.
    pub fn resolve(&self, local: Option<&Memory>, event: &MemoryEvent) -> Memory {
        let local = match local {
            Some(local) => local,
            None => return self.memory_from_event(&event.memory_id, event),
        };

        if let Some(custom) = &self.custom {
            return custom(local, event);
        }

        match self.policy {
            ConflictPolicy::MergeAll => self.merge_all(local, event),
            ConflictPolicy::LastWriteWins => self.last_write_wins(local, event),
            ConflictPolicy::Importance => {
                if event.importance > local.importance {
                    self.memory_from_event(&local.id, event)
                } else {
                    local.clone()
                }
            }
            ConflictPolicy::VectorClock => {
                match compare_clocks(&local.vector_clock, &event.vector_clock) {
                    ClockOrdering::Before => self.memory_from_event(&local.id, event),
                    ClockOrdering::After | ClockOrdering::Equal => local.clone(),
                    ClockOrdering::Concurrent => self.merge_all(local, event),
                }
            }
        }
    }

    /// Whether local state and the remote event diverge on any field
    ///
    /// Returns the list of diverging fields; empty means no conflict.
    pub fn detect_conflict(&self, local: &Memory, event: &MemoryEvent) -> Vec<&'static str> {
        let mut diverging = Vec::new();
        if local.content != event.content {
            diverging.push("content");
        }
        if (local.importance - event.importance).abs() > f32::EPSILON {
            diverging.push("importance");
        }
        if !tags_equal(&local.tags, &event.tags) {
            diverging.push("tags");
        }
        diverging
    }

    /// Materialize a memory from an event's point-in-time field copies
    pub fn memory_from_event(&self, memory_id: &str, event: &MemoryEvent) -> Memory {
        Memory {
            id: memory_id.to_string(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            content: event.content.clone(),
            embedding: event.embedding.clone(),
            importance: event.importance,
            tags: event.tags.clone(),
            entities: event.entities.clone(),
            metadata: event.metadata.clone(),
            vector_clock: event.vector_clock.clone(),
            created_at: event.timestamp,
            updated_at: event.timestamp,
        }
    }

    /// Field-wise join of local state and the remote event
    fn merge_all(&self, local: &Memory, event: &MemoryEvent) -> Memory {
        Memory {
            id: local.id.clone(),
            user_id: join_text(&local.user_id, &event.user_id),
            session_id: join_text(&local.session_id, &event.session_id),
            content: join_text(&local.content, &event.content),
            embedding: join_embedding(local.embedding.as_deref(), event.embedding.as_deref()),
            importance: local.importance.max(event.importance),
            tags: merge_tags(&local.tags, &event.tags),
            entities: merge_entities(&local.entities, &event.entities),
            metadata: merge_metadata(&local.metadata, &event.metadata),
            vector_clock: merge_clocks(&local.vector_clock, &event.vector_clock),
            created_at: local.created_at.min(event.timestamp),
            updated_at: local.updated_at.max(event.timestamp),
        }
    }

    fn last_write_wins(&self, local: &Memory, event: &MemoryEvent) -> Memory {
        match event.timestamp.cmp(&local.updated_at) {
            std::cmp::Ordering::Greater => self.memory_from_event(&local.id, event),
            std::cmp::Ordering::Less => local.clone(),
            // Equal timestamps give no winner; the join keeps both
            // replicas identical either way
            std::cmp::Ordering::Equal => self.merge_all(local, event),
        }
    }
}

/// Text join: longer wins, equal lengths fall back to byte order. Symmetric
/// in its arguments, so merges commute.
fn join_text(local: &str, remote: &str) -> String {
    match local.len().cmp(&remote.len()) {
        std::cmp::Ordering::Greater => local.to_string(),
        std::cmp::Ordering::Less => remote.to_string(),
        std::cmp::Ordering::Equal => {
            if local >= remote {
                local.to_string()
            } else {
                remote.to_string()
            }
        }
    }
}

/// Pairwise maximum of two vector clocks
pub fn merge_clocks(
    local: &HashMap<String, i64>,
    remote: &HashMap<String, i64>,
) -> HashMap<String, i64> {
    let mut merged = local.clone();
    for (node, counter) in remote {
        let entry = merged.entry(node.clone()).or_insert(0);
        *entry = (*entry).max(*counter);
    }
    merged
}

/// Causal comparison of two vector clocks; absent nodes count as zero
pub fn compare_clocks(a: &HashMap<String, i64>, b: &HashMap<String, i64>) -> ClockOrdering {
    let counter = |clock: &HashMap<String, i64>, node: &str| clock.get(node).copied().unwrap_or(0);
    let a_dominated = a
        .keys()
        .chain(b.keys())
        .all(|node| counter(a, node) <= counter(b, node));
    let b_dominated = a
        .keys()
        .chain(b.keys())
        .all(|node| counter(b, node) <= counter(a, node));
    match (a_dominated, b_dominated) {
        (true, true) => ClockOrdering::Equal,
        (true, false) => ClockOrdering::Before,
        (false, true) => ClockOrdering::After,
        (false, false) => ClockOrdering::Concurrent,
    }
}

/// Embedding join: prefer present; both present picks the larger by
/// (length, then bitwise order) so the choice is order-independent
fn join_embedding(local: Option<&[f32]>, remote: Option<&[f32]>) -> Option<Vec<f32>> {
    match (local, remote) {
        (None, None) => None,
        (Some(local), None) => Some(local.to_vec()),
        (None, Some(remote)) => Some(remote.to_vec()),
        (Some(local), Some(remote)) => {
            let local_bytes: Vec<u8> = local.iter().flat_map(|f| f.to_le_bytes()).collect();
            let remote_bytes: Vec<u8> = remote.iter().flat_map(|f| f.to_le_bytes()).collect();
            if (local.len(), &local_bytes) >= (remote.len(), &remote_bytes) {
                Some(local.to_vec())
            } else {
                Some(remote.to_vec())
            }
        }
    }
}

/// Union of both tag sets, preserving first-seen order (local first)
pub fn merge_tags(local: &[String], remote: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(local.len() + remote.len());
    for tag in local.iter().chain(remote.iter()) {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged.sort();
    merged
}

/// Union by entity id; overlapping ids keep the higher-confidence record,
/// ties resolved by name order
pub fn merge_entities(local: &[MemoryEntity], remote: &[MemoryEntity]) -> Vec<MemoryEntity> {
    let mut by_id: HashMap<&str, &MemoryEntity> = HashMap::new();
    for entity in local.iter().chain(remote.iter()) {
        match by_id.get(entity.id.as_str()) {
            Some(existing)
                if (existing.confidence, &existing.name) >= (entity.confidence, &entity.name) => {}
            _ => {
                by_id.insert(&entity.id, entity);
            }
        }
    }
    let mut merged: Vec<MemoryEntity> = by_id.into_values().cloned().collect();
    merged.sort_by(|a, b| a.id.cmp(&b.id));
    merged
}

/// Key union; conflicting keys keep the greater serialized value so the
/// merge is independent of application order
pub fn merge_metadata(
    local: &HashMap<String, serde_json::Value>,
    remote: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    let mut merged = local.clone();
    for (key, value) in remote {
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), value.clone());
            }
            Some(existing) if existing == value => {}
            Some(existing) => {
                if value.to_string() > existing.to_string() {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    merged
}

fn tags_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryEventType;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn local_memory(content: &str) -> Memory {
        let mut memory = Memory::new("user1", content);
        memory.id = "mem1".to_string();
        memory
    }

    fn remote_event(content: &str) -> MemoryEvent {
        let mut memory = local_memory(content);
        memory.user_id = "user1".to_string();
        MemoryEvent::from_memory(
            MemoryEventType::Updated,
            "remote-node",
            &memory,
            HashMap::new(),
        )
    }

    fn remote_event_with_clock(content: &str, clock: HashMap<String, i64>) -> MemoryEvent {
        let mut event = remote_event(content);
        event.vector_clock = clock;
        event
    }

    #[test]
    fn test_merge_all_session_id_commutes() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let mut event_a = remote_event("content");
        event_a.session_id = "session-alpha".to_string();
        let mut event_b = remote_event("content");
        event_b.session_id = "session-beta".to_string();

        let ab = resolver.resolve(Some(&resolver.resolve(None, &event_a)), &event_b);
        let ba = resolver.resolve(Some(&resolver.resolve(None, &event_b)), &event_a);

        assert_eq!(ab.session_id, ba.session_id);
        assert_eq!(ab.user_id, ba.user_id);
    }

    #[test]
    fn test_last_write_wins_timestamp_tie_converges() {
        let resolver = ConflictResolver::new(ConflictPolicy::LastWriteWins);
        let shared = Utc::now();
        let mut event_a = remote_event("state from node a");
        event_a.timestamp = shared;
        let mut event_b = remote_event("state from node b, a bit longer");
        event_b.timestamp = shared;
        event_b.node_id = "other-node".to_string();

        let ab = resolver.resolve(Some(&resolver.resolve(None, &event_a)), &event_b);
        let ba = resolver.resolve(Some(&resolver.resolve(None, &event_b)), &event_a);

        assert_eq!(ab.content, "state from node b, a bit longer");
        assert_eq!(ab.content, ba.content);
    }

    #[test]
    fn test_compare_clocks() {
        let earlier = HashMap::from([("a".to_string(), 1)]);
        let later = HashMap::from([("a".to_string(), 2), ("b".to_string(), 1)]);
        let sideways = HashMap::from([("c".to_string(), 5)]);

        assert_eq!(compare_clocks(&earlier, &later), ClockOrdering::Before);
        assert_eq!(compare_clocks(&later, &earlier), ClockOrdering::After);
        assert_eq!(compare_clocks(&earlier, &earlier), ClockOrdering::Equal);
        assert_eq!(compare_clocks(&earlier, &sideways), ClockOrdering::Concurrent);
    }

    #[test]
    fn test_vector_clock_policy_causal_order() {
        let resolver = ConflictResolver::new(ConflictPolicy::VectorClock);
        let older =
            remote_event_with_clock("older state", HashMap::from([("origin".to_string(), 1)]));
        let newer =
            remote_event_with_clock("newer state", HashMap::from([("origin".to_string(), 2)]));

        // Causally later event wins regardless of arrival order
        let forward = resolver.resolve(Some(&resolver.resolve(None, &older)), &newer);
        let backward = resolver.resolve(Some(&resolver.resolve(None, &newer)), &older);
        assert_eq!(forward.content, "newer state");
        assert_eq!(backward.content, "newer state");
    }

    #[test]
    fn test_vector_clock_policy_concurrent_joins() {
        let resolver = ConflictResolver::new(ConflictPolicy::VectorClock);
        let mut from_a =
            remote_event_with_clock("written on a", HashMap::from([("node-a".to_string(), 1)]));
        from_a.tags = vec!["alpha".to_string()];
        let mut from_b = remote_event_with_clock(
            "written on b, longer",
            HashMap::from([("node-b".to_string(), 1)]),
        );
        from_b.tags = vec!["beta".to_string()];

        let ab = resolver.resolve(Some(&resolver.resolve(None, &from_a)), &from_b);
        let ba = resolver.resolve(Some(&resolver.resolve(None, &from_b)), &from_a);

        assert_eq!(ab.content, "written on b, longer");
        assert_eq!(ab.content, ba.content);
        assert_eq!(ab.tags, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(ab.vector_clock, ba.vector_clock);
        assert_eq!(ab.vector_clock["node-a"], 1);
        assert_eq!(ab.vector_clock["node-b"], 1);
    }

    #[test]
    fn test_custom_resolver_overrides_policy() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll).with_custom(Arc::new(
            |local: &Memory, _event: &MemoryEvent| {
                let mut kept = local.clone();
                kept.tags.push("custom".to_string());
                kept
            },
        ));
        let local = local_memory("local content");
        let event = remote_event("a much longer remote content that merge would pick");

        let resolved = resolver.resolve(Some(&local), &event);
        assert_eq!(resolved.content, "local content");
        assert_eq!(resolved.tags, vec!["custom".to_string()]);

        // Absent local still materializes the event
        let materialized = resolver.resolve(None, &event);
        assert_ne!(materialized.content, "local content");
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "merge_all".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::MergeAll
        );
        assert_eq!(
            "lww".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::LastWriteWins
        );
        assert!("quorum".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_absent_local_materializes_event() {
        let resolver = ConflictResolver::default();
        let event = remote_event("remote content");

        let resolved = resolver.resolve(None, &event);
        assert_eq!(resolved.id, "mem1");
        assert_eq!(resolved.content, "remote content");
        assert_eq!(resolved.created_at, event.timestamp);
    }

    #[test]
    fn test_merge_all_longer_content_wins() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let local = local_memory("short");
        let event = remote_event("much longer remote content");

        let merged = resolver.resolve(Some(&local), &event);
        assert_eq!(merged.content, "much longer remote content");

        let local_long = local_memory("the longest local content of all");
        let merged = resolver.resolve(Some(&local_long), &event);
        assert_eq!(merged.content, "the longest local content of all");
    }

    #[test]
    fn test_merge_all_is_idempotent() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let local = local_memory("content");
        let event = remote_event("remote content with more text");

        let once = resolver.resolve(Some(&local), &event);
        let twice = resolver.resolve(Some(&once), &event);
        assert_eq!(once.content, twice.content);
        assert_eq!(once.tags, twice.tags);
        assert_eq!(once.metadata, twice.metadata);
        assert_eq!(once.importance, twice.importance);
    }

    #[test]
    fn test_merge_all_commutes() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let mut event_a = remote_event("content from node a");
        event_a.importance = 0.3;
        event_a.tags = vec!["alpha".to_string()];
        let mut event_b = remote_event("content written on node b");
        event_b.importance = 0.8;
        event_b.tags = vec!["beta".to_string()];
        event_b.node_id = "other-node".to_string();

        let ab = resolver.resolve(Some(&resolver.resolve(None, &event_a)), &event_b);
        let ba = resolver.resolve(Some(&resolver.resolve(None, &event_b)), &event_a);

        assert_eq!(ab.content, ba.content);
        assert_eq!(ab.importance, ba.importance);
        assert_eq!(ab.tags, ba.tags);
        assert_eq!(ab.metadata, ba.metadata);
    }

    #[test]
    fn test_merge_all_keeps_both_metadata_keys() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let mut local = local_memory("content");
        local
            .metadata
            .insert("key1".to_string(), serde_json::json!("val1"));
        let mut event = remote_event("c");
        event
            .metadata
            .insert("key2".to_string(), serde_json::json!("val2"));

        let merged = resolver.resolve(Some(&local), &event);
        assert_eq!(merged.metadata["key1"], "val1");
        assert_eq!(merged.metadata["key2"], "val2");
    }

    #[test]
    fn test_merge_all_importance_is_max() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let mut local = local_memory("content");
        local.importance = 0.9;
        let mut event = remote_event("c");
        event.importance = 0.3;

        let merged = resolver.resolve(Some(&local), &event);
        assert_eq!(merged.importance, 0.9);
    }

    #[test]
    fn test_merge_all_embedding_prefers_present() {
        let resolver = ConflictResolver::new(ConflictPolicy::MergeAll);
        let mut local = local_memory("content");
        local.embedding = Some(vec![0.1]);
        let event = remote_event("c");

        let merged = resolver.resolve(Some(&local), &event);
        assert_eq!(merged.embedding, Some(vec![0.1]));
    }

    #[test]
    fn test_last_write_wins_by_timestamp() {
        let resolver = ConflictResolver::new(ConflictPolicy::LastWriteWins);
        let mut local = local_memory("local content");
        local.updated_at = Utc::now() - Duration::hours(1);
        let event = remote_event("remote content");

        let resolved = resolver.resolve(Some(&local), &event);
        assert_eq!(resolved.content, "remote content");

        let mut newer_local = local_memory("local content");
        newer_local.updated_at = Utc::now() + Duration::hours(1);
        let resolved = resolver.resolve(Some(&newer_local), &event);
        assert_eq!(resolved.content, "local content");
    }

    #[test]
    fn test_importance_policy() {
        let resolver = ConflictResolver::new(ConflictPolicy::Importance);
        let mut local = local_memory("local");
        local.importance = 0.5;

        let mut event = remote_event("remote");
        event.importance = 0.9;
        assert_eq!(resolver.resolve(Some(&local), &event).content, "remote");

        event.importance = 0.5;
        assert_eq!(resolver.resolve(Some(&local), &event).content, "local");
    }

    #[test]
    fn test_detect_conflict() {
        let resolver = ConflictResolver::default();
        let local = local_memory("same");
        let mut event = remote_event("same");
        event.importance = local.importance;
        event.tags = local.tags.clone();
        assert!(resolver.detect_conflict(&local, &event).is_empty());

        event.content = "different".to_string();
        event.tags = vec!["extra".to_string()];
        let diverging = resolver.detect_conflict(&local, &event);
        assert!(diverging.contains(&"content"));
        assert!(diverging.contains(&"tags"));
    }

    #[test]
    fn test_merge_tags_union() {
        let merged = merge_tags(
            &["a".to_string(), "b".to_string()],
            &["b".to_string(), "c".to_string()],
        );
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_entities_higher_confidence_wins() {
        let local = vec![MemoryEntity {
            id: "e1".to_string(),
            name: "A".to_string(),
            entity_type: "person".to_string(),
            confidence: 0.5,
        }];
        let remote = vec![
            MemoryEntity {
                id: "e1".to_string(),
                name: "A-Updated".to_string(),
                entity_type: "person".to_string(),
                confidence: 0.9,
            },
            MemoryEntity {
                id: "e2".to_string(),
                name: "B".to_string(),
                entity_type: "org".to_string(),
                confidence: 0.6,
            },
        ];

        let merged = merge_entities(&local, &remote);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "A-Updated");
    }
}
