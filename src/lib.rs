//! Mnemo - Distributed Memory Synchronization
//!
//! Eventually consistent memory replication over an append-only event log,
//! plus an infinite conversation context engine that reconstructs and
//! compresses conversations under a token budget.

pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod log;
pub mod store;
pub mod sync;
pub mod types;

pub use broker::{BrokerMessage, InMemoryBroker, MessageBroker, SharedBroker, Subscription};
pub use config::{ContextConfig, SyncConfig};
pub use context::{ConversationReader, InMemoryConversationLog, InfiniteContextEngine};
pub use error::{MnemoError, Result};
pub use llm::CompletionClient;
pub use log::{EventLog, InMemoryEventLog};
pub use store::{InMemoryStore, MemoryStore};
pub use sync::{ConflictPolicy, ConflictResolver, DistributedMemoryManager};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
