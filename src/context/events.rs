//! Conversation event and projection types
//!
//! Conversations are reconstructed from an append-only stream of events.
//! The stream may arrive out of order and may carry event types this
//! version does not know about; reconstruction sorts by sequence number
//! and skips what it cannot interpret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model context window assumed when reporting usage
pub const CONTEXT_WINDOW_TOKENS: i64 = 128_000;

/// Kinds of conversation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEventType {
    MessageAdded,
    EntityExtracted,
    DebateRound,
    Compressed,
    #[serde(other)]
    #[default]
    Unknown,
}

impl std::fmt::Display for ConversationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationEventType::MessageAdded => write!(f, "message_added"),
            ConversationEventType::EntityExtracted => write!(f, "entity_extracted"),
            ConversationEventType::DebateRound => write!(f, "debate_round"),
            ConversationEventType::Compressed => write!(f, "compressed"),
            ConversationEventType::Unknown => write!(f, "unknown"),
        }
    }
}

/// One event in a conversation's log
///
/// Payload fields are optional; an event whose payload is missing for its
/// type is skipped during reconstruction rather than treated as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_type: ConversationEventType,
    #[serde(default)]
    pub conversation_id: String,
    /// Total order within the conversation
    #[serde(default)]
    pub sequence_number: i64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message: Option<MessageData>,
    #[serde(default)]
    pub entities: Option<Vec<EntityData>>,
    #[serde(default)]
    pub debate_round: Option<DebateRoundData>,
    #[serde(default)]
    pub compression: Option<CompressionStats>,
}

impl ConversationEvent {
    /// Build a message event
    pub fn message(conversation_id: &str, sequence_number: i64, message: MessageData) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: ConversationEventType::MessageAdded,
            conversation_id: conversation_id.to_string(),
            sequence_number,
            timestamp: Utc::now(),
            message: Some(message),
            entities: None,
            debate_round: None,
            compression: None,
        }
    }

    /// Build an entity-extraction event
    pub fn entities(
        conversation_id: &str,
        sequence_number: i64,
        entities: Vec<EntityData>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: ConversationEventType::EntityExtracted,
            conversation_id: conversation_id.to_string(),
            sequence_number,
            timestamp: Utc::now(),
            message: None,
            entities: Some(entities),
            debate_round: None,
            compression: None,
        }
    }

    /// Build a debate-round event
    pub fn debate_round(
        conversation_id: &str,
        sequence_number: i64,
        round: DebateRoundData,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: ConversationEventType::DebateRound,
            conversation_id: conversation_id.to_string(),
            sequence_number,
            timestamp: Utc::now(),
            message: None,
            entities: None,
            debate_round: Some(round),
            compression: None,
        }
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub message_id: String,
    /// "user", "assistant" or "system"
    pub role: String,
    pub content: String,
    /// Exact token count when known, 0 otherwise
    #[serde(default)]
    pub tokens: i64,
    /// Model that produced the message, for assistant messages
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageData {
    /// Exact token count when present, otherwise a length-based estimate
    pub fn count_tokens(&self) -> i64 {
        if self.tokens > 0 {
            self.tokens
        } else {
            self.content.len() as i64 / 4
        }
    }
}

/// An entity extracted from the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub entity_id: String,
    #[serde(default, rename = "type")]
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Outcome of one multi-model debate round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRoundData {
    pub round_id: String,
    #[serde(default)]
    pub round_number: i64,
    pub content: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

impl DebateRoundData {
    /// Project the round into the conversation as an assistant message
    pub fn to_message(&self) -> MessageData {
        MessageData {
            message_id: self.round_id.clone(),
            role: "assistant".to_string(),
            content: self.content.clone(),
            tokens: self.tokens,
            model: if self.model.is_empty() {
                None
            } else {
                Some(self.model.clone())
            },
            created_at: self.created_at,
        }
    }
}

/// Outcome metrics of one compression pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub strategy: String,
    pub original_messages: usize,
    pub compressed_messages: usize,
    pub original_tokens: i64,
    pub compressed_tokens: i64,
    /// compressed/original tokens, in (0, 1]
    pub compression_ratio: f64,
    /// Share of known entities still mentioned after compression
    pub quality_estimate: f64,
    pub duration_ms: i64,
}

/// Point-in-time projection of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub snapshot_id: String,
    pub conversation_id: String,
    /// Messages in conversation order
    pub messages: Vec<MessageData>,
    /// Entities deduplicated by id, later extraction wins
    pub entities: Vec<EntityData>,
    pub message_count: usize,
    pub entity_count: usize,
    pub total_tokens: i64,
    /// Compression passes recorded in the event log
    #[serde(default)]
    pub compressed_count: usize,
    #[serde(default)]
    pub compression_ratio: f64,
    pub timestamp: DateTime<Utc>,
    /// Present only when this snapshot was produced by a compression pass
    #[serde(default)]
    pub compression: Option<CompressionStats>,
}

impl ConversationSnapshot {
    /// Usage report against the assumed model context window
    pub fn context_data(&self) -> ContextData {
        ContextData {
            message_count: self.message_count,
            entity_count: self.entity_count,
            total_tokens: self.total_tokens,
            context_window: CONTEXT_WINDOW_TOKENS,
            usage: self.total_tokens as f64 / CONTEXT_WINDOW_TOKENS as f64,
        }
    }
}

/// Context window usage for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    pub message_count: usize,
    pub entity_count: usize,
    pub total_tokens: i64,
    pub context_window: i64,
    /// total_tokens / context_window
    pub usage: f64,
}
