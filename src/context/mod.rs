//! Infinite conversation context
//!
//! A conversation's history lives in an append-only event log and is never
//! truncated. [`InfiniteContextEngine`] projects the log into bounded
//! working sets, compressing through [`ContextCompressor`] when a token
//! budget is exceeded and caching reconstructions in [`ContextCache`].

pub mod cache;
pub mod compressor;
pub mod engine;
pub mod events;
pub mod log;

pub use cache::ContextCache;
pub use compressor::{CompressionConfig, CompressionStrategy, ContextCompressor};
pub use engine::{ConversationReader, InfiniteContextEngine};
pub use log::InMemoryConversationLog;
pub use events::{
    CompressionStats, ContextData, ConversationEvent, ConversationEventType,
    ConversationSnapshot, DebateRoundData, EntityData, MessageData, CONTEXT_WINDOW_TOKENS,
};
