//! Infinite context engine
//!
//! Treats a conversation's full history as an append-only event log and
//! serves bounded working sets from it. Reconstruction is deterministic:
//! the same log always yields the same message list, so any node reading
//! the replicated log projects the same conversation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::config::ContextConfig;
use crate::context::cache::ContextCache;
use crate::context::compressor::{CompressionConfig, ContextCompressor};
use crate::context::events::{
    ConversationEvent, ConversationEventType, ConversationSnapshot, EntityData, MessageData,
};
use crate::error::Result;
use crate::llm::CompletionClient;

/// Read access to a conversation's event log
#[async_trait]
pub trait ConversationReader: Send + Sync {
    /// All events recorded for one conversation, in any order
    async fn fetch_events(&self, conversation_id: &str) -> Result<Vec<ConversationEvent>>;
}

/// Reconstructs and compresses conversations from their event logs
pub struct InfiniteContextEngine {
    reader: Arc<dyn ConversationReader>,
    compressor: ContextCompressor,
    cache: ContextCache,
    config: ContextConfig,
}

impl InfiniteContextEngine {
    pub fn new(
        reader: Arc<dyn ConversationReader>,
        client: Option<Arc<dyn CompletionClient>>,
        config: ContextConfig,
    ) -> Self {
        let compressor = ContextCompressor::new(
            client,
            CompressionConfig {
                strategy: config.default_strategy,
                ..CompressionConfig::default()
            },
        );
        let cache = ContextCache::new(
            config.cache_max_size,
            Duration::from_secs(config.cache_ttl_secs),
        );
        Self {
            reader,
            compressor,
            cache,
            config,
        }
    }

    /// Full projection of one conversation, cache-first
    pub async fn get_conversation_snapshot(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSnapshot> {
        if let Some(snapshot) = self.cache.get(conversation_id) {
            tracing::debug!(conversation_id, "context cache hit");
            return Ok(snapshot);
        }

        let events = self.reader.fetch_events(conversation_id).await?;
        let snapshot = reconstruct(conversation_id, events, self.config.min_entity_confidence);
        tracing::info!(
            conversation_id,
            messages = snapshot.message_count,
            tokens = snapshot.total_tokens,
            "reconstructed conversation"
        );
        self.cache.insert(conversation_id, snapshot.clone());
        Ok(snapshot)
    }

    /// The ordered message list of one conversation
    pub async fn replay_conversation(&self, conversation_id: &str) -> Result<Vec<MessageData>> {
        Ok(self.get_conversation_snapshot(conversation_id).await?.messages)
    }

    /// Replay under the configured default token budget
    pub async fn replay_within_default_budget(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSnapshot> {
        self.replay_with_compression(conversation_id, self.config.default_max_tokens)
            .await
    }

    /// Replay under an explicit token budget
    ///
    /// A conversation already within budget comes back unchanged with no
    /// compression stats. A failed compression pass is logged and the
    /// uncompressed snapshot is returned; callers always get usable context.
    pub async fn replay_with_compression(
        &self,
        conversation_id: &str,
        max_tokens: i64,
    ) -> Result<ConversationSnapshot> {
        let snapshot = self.get_conversation_snapshot(conversation_id).await?;
        if snapshot.total_tokens <= max_tokens {
            return Ok(snapshot);
        }

        match self
            .compressor
            .compress_with_strategy(
                &snapshot.messages,
                &snapshot.entities,
                max_tokens,
                self.config.default_strategy,
            )
            .await
        {
            Ok((messages, stats)) => {
                let total_tokens = messages.iter().map(MessageData::count_tokens).sum();
                Ok(ConversationSnapshot {
                    snapshot_id: Uuid::new_v4().to_string(),
                    conversation_id: snapshot.conversation_id,
                    message_count: messages.len(),
                    entity_count: snapshot.entities.len(),
                    total_tokens,
                    messages,
                    entities: snapshot.entities,
                    compressed_count: snapshot.compressed_count + 1,
                    compression_ratio: stats.compression_ratio,
                    timestamp: Utc::now(),
                    compression: Some(stats),
                })
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    error = %e,
                    "compression failed, serving uncompressed context"
                );
                Ok(snapshot)
            }
        }
    }

    /// Drop a stale cached projection, e.g. after new events were written
    pub fn invalidate(&self, conversation_id: &str) {
        self.cache.invalidate(conversation_id);
    }

    /// Drop all cached projections
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Cached conversations
    pub fn cached_conversations(&self) -> usize {
        self.cache.len()
    }
}

/// Fold an event log into a snapshot
///
/// Events sort by sequence number; events with a missing payload or an
/// unknown type are skipped. Entities below the confidence floor are
/// dropped, the rest deduplicate by id with the later extraction winning,
/// and debate rounds project to assistant messages.
fn reconstruct(
    conversation_id: &str,
    mut events: Vec<ConversationEvent>,
    min_entity_confidence: f64,
) -> ConversationSnapshot {
    events.sort_by_key(|event| event.sequence_number);

    let mut messages: Vec<MessageData> = Vec::new();
    let mut entities: Vec<EntityData> = Vec::new();
    let mut entity_index: HashMap<String, usize> = HashMap::new();
    let mut compressed_count = 0usize;
    let mut compression_ratio = 0.0f64;

    for event in events {
        match event.event_type {
            ConversationEventType::MessageAdded => {
                if let Some(message) = event.message {
                    messages.push(message);
                }
            }
            ConversationEventType::EntityExtracted => {
                for entity in event.entities.into_iter().flatten() {
                    if entity.confidence < min_entity_confidence {
                        continue;
                    }
                    match entity_index.get(&entity.entity_id) {
                        Some(&i) => entities[i] = entity,
                        None => {
                            entity_index.insert(entity.entity_id.clone(), entities.len());
                            entities.push(entity);
                        }
                    }
                }
            }
            ConversationEventType::DebateRound => {
                if let Some(round) = event.debate_round {
                    messages.push(round.to_message());
                }
            }
            ConversationEventType::Compressed => {
                if let Some(stats) = event.compression {
                    compressed_count += 1;
                    compression_ratio = stats.compression_ratio;
                }
            }
            ConversationEventType::Unknown => {
                tracing::debug!(
                    event_id = %event.event_id,
                    "skipping unknown conversation event"
                );
            }
        }
    }

    let total_tokens = messages.iter().map(MessageData::count_tokens).sum();
    ConversationSnapshot {
        snapshot_id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        message_count: messages.len(),
        entity_count: entities.len(),
        total_tokens,
        messages,
        entities,
        compressed_count,
        compression_ratio,
        timestamp: Utc::now(),
        compression: None,
    }
}
