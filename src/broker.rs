//! Message broker capability
//!
//! The production transport (Kafka or equivalent, at-least-once,
//! topic-partitioned) lives behind [`MessageBroker`]. The in-process
//! [`InMemoryBroker`] satisfies the same contract for single-node use and
//! tests, including redelivery-tolerant consumers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::{MnemoError, Result};

/// A message on a topic: key, JSON payload, optional headers
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// Partition key
    pub key: String,
    /// JSON-encoded payload
    pub payload: Vec<u8>,
    /// Transport headers
    pub headers: HashMap<String, String>,
}

impl BrokerMessage {
    /// Create a message with a JSON payload
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
            headers: HashMap::new(),
        }
    }

    /// Attach a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A live subscription to one topic
pub struct Subscription {
    receiver: broadcast::Receiver<BrokerMessage>,
}

impl Subscription {
    /// Receive the next message; `None` when the topic is closed
    ///
    /// Consumers that fall behind the channel capacity observe a lag and
    /// continue from the oldest retained message, mirroring at-least-once
    /// redelivery: the consumer must stay idempotent either way.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscription lagged, resuming from oldest retained");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Transport-agnostic publish/subscribe capability
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a message to a topic
    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<()>;

    /// Subscribe to a topic from the current position
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    /// Whether the transport currently has a healthy connection
    fn is_connected(&self) -> bool;
}

/// In-process broker backed by one broadcast channel per topic
pub struct InMemoryBroker {
    topics: RwLock<HashMap<String, broadcast::Sender<BrokerMessage>>>,
    capacity: usize,
    connected: RwLock<bool>,
}

impl InMemoryBroker {
    /// Create a broker with the default per-topic capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a broker with an explicit per-topic capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
            connected: RwLock::new(true),
        }
    }

    /// Simulate transport loss (used by tests)
    pub fn set_connected(&self, connected: bool) {
        *self.connected.write() = connected;
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BrokerMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(MnemoError::Broker("broker disconnected".to_string()));
        }
        // A send error only means no subscriber is listening yet; the
        // message is still accepted, matching fire-and-forget publish.
        let _ = self.sender_for(topic).send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        if !self.is_connected() {
            return Err(MnemoError::Broker("broker disconnected".to_string()));
        }
        Ok(Subscription {
            receiver: self.sender_for(topic).subscribe(),
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.read()
    }
}

/// Shared broker handle
pub type SharedBroker = Arc<dyn MessageBroker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("memory.events").await.unwrap();

        let message = BrokerMessage::new("mem-1", b"{\"x\":1}".to_vec())
            .with_header("sync_request", "true");
        broker.publish("memory.events", message).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.key, "mem-1");
        assert_eq!(received.header("sync_request"), Some("true"));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broker = InMemoryBroker::new();
        let mut conversations = broker.subscribe("conversations").await.unwrap();

        broker
            .publish("memory.events", BrokerMessage::new("k", vec![]))
            .await
            .unwrap();
        broker
            .publish("conversations", BrokerMessage::new("conv-1", vec![]))
            .await
            .unwrap();

        let received = conversations.recv().await.unwrap();
        assert_eq!(received.key, "conv-1");
    }

    #[tokio::test]
    async fn test_disconnected_broker_errors() {
        let broker = InMemoryBroker::new();
        broker.set_connected(false);

        let err = broker
            .publish("memory.events", BrokerMessage::new("k", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(broker.subscribe("memory.events").await.is_err());
    }
}
