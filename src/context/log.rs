//! Conversation event log
//!
//! [`InMemoryConversationLog`] accumulates [`ConversationEvent`]s per
//! conversation and serves them through the [`ConversationReader`] boundary
//! the engine replays from. Events arrive either through direct
//! [`record`] calls or from broker topics via [`start_feed`].
//!
//! [`record`]: InMemoryConversationLog::record
//! [`start_feed`]: InMemoryConversationLog::start_feed

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::broker::SharedBroker;
use crate::context::engine::ConversationReader;
use crate::context::events::ConversationEvent;
use crate::error::Result;

/// In-process store of conversation events, keyed by conversation id
pub struct InMemoryConversationLog {
    events: DashMap<String, Vec<ConversationEvent>>,
}

impl InMemoryConversationLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    /// Append an event to its conversation
    pub fn record(&self, event: ConversationEvent) {
        self.events
            .entry(event.conversation_id.clone())
            .or_default()
            .push(event);
    }

    /// Events recorded for one conversation
    pub fn len(&self, conversation_id: &str) -> usize {
        self.events
            .get(conversation_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Consume one broker topic into this log
    ///
    /// Subscribes before returning, then records every parseable
    /// [`ConversationEvent`] in the background; malformed payloads are
    /// logged and dropped. The task ends when the topic closes. Both the
    /// conversations and debates topics carry this event shape, so callers
    /// start one feed per topic.
    pub async fn start_feed(self: &Arc<Self>, broker: SharedBroker, topic: &str) -> Result<()> {
        let mut subscription = broker.subscribe(topic).await?;
        let log = Arc::clone(self);
        let topic = topic.to_string();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                match serde_json::from_slice::<ConversationEvent>(&message.payload) {
                    Ok(event) => log.record(event),
                    Err(e) => {
                        tracing::warn!(
                            topic = %topic,
                            key = %message.key,
                            error = %e,
                            "dropping malformed conversation event"
                        );
                    }
                }
            }
            tracing::info!(topic = %topic, "conversation feed stopped");
        });
        Ok(())
    }
}

impl Default for InMemoryConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationReader for InMemoryConversationLog {
    async fn fetch_events(&self, conversation_id: &str) -> Result<Vec<ConversationEvent>> {
        Ok(self
            .events
            .get(conversation_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}
