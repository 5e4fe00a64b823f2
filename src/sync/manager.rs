//! Distributed memory manager
//!
//! Owns the local store, the conflict resolver, and the event-log
//! publisher/consumer pair. Local mutations are authoritative for this
//! node: the store write happens first, and a failed publish never fails
//! the call. Convergence with other nodes is eventual, driven by the
//! resolver's algebraic properties rather than cross-node locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::broker::{BrokerMessage, SharedBroker};
use crate::config::SyncConfig;
use crate::error::{MnemoError, Result};
use crate::log::EventLog;
use crate::store::MemoryStore;
use crate::sync::ConflictResolver;
use crate::types::{
    Memory, MemoryEvent, MemoryEventType, NodeIdentity, SyncStatus, HEADER_SYNC_REQUEST,
};

/// Point-in-time dump of one user's memories, exchanged for anti-entropy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub snapshot_id: String,
    pub node_id: String,
    pub user_id: String,
    pub memories: Vec<Memory>,
    pub vector_clock: HashMap<String, i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    applied: AtomicU64,
    suppressed: AtomicU64,
    conflicts: AtomicU64,
}

/// Per-node coordinator for replicated memory state
pub struct DistributedMemoryManager {
    node: NodeIdentity,
    store: Arc<dyn MemoryStore>,
    log: Arc<dyn EventLog>,
    resolver: ConflictResolver,
    broker: Option<SharedBroker>,
    config: SyncConfig,
    clock: Mutex<HashMap<String, i64>>,
    local_events: broadcast::Sender<MemoryEvent>,
    counters: Counters,
    last_remote_applied: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl DistributedMemoryManager {
    /// Create a manager; `config.node_id` empty means a generated identity
    pub fn new(
        store: Arc<dyn MemoryStore>,
        log: Arc<dyn EventLog>,
        resolver: ConflictResolver,
        broker: Option<SharedBroker>,
        config: SyncConfig,
    ) -> Self {
        let node = NodeIdentity::new(config.node_id.clone());
        let (local_events, _) = broadcast::channel(256);
        Self {
            node,
            store,
            log,
            resolver,
            broker,
            config,
            clock: Mutex::new(HashMap::new()),
            local_events,
            counters: Counters::default(),
            last_remote_applied: Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// This node's identity
    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    /// Copy of the node's vector clock
    pub fn vector_clock(&self) -> HashMap<String, i64> {
        self.clock.lock().clone()
    }

    /// Subscribe to this node's local mutations
    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.local_events.subscribe()
    }

    /// Add a memory locally and announce it to the cluster
    ///
    /// The local write is authoritative; log append and publish failures
    /// are logged and do not fail the call.
    pub async fn add_memory(&self, mut memory: Memory) -> Result<()> {
        let clock = self.tick_clock();
        memory.vector_clock = clock.clone();
        self.store.add(memory.clone()).await?;
        let event =
            MemoryEvent::from_memory(MemoryEventType::Created, self.node.as_str(), &memory, clock);
        self.record_and_publish(event).await;
        Ok(())
    }

    /// Update a memory locally and announce it to the cluster
    pub async fn update_memory(&self, mut memory: Memory) -> Result<()> {
        let clock = self.tick_clock();
        memory.vector_clock = clock.clone();
        self.store.update(memory.clone()).await.map_err(|e| {
            MnemoError::Storage(format!("failed to update memory locally: {}", e))
        })?;
        let event =
            MemoryEvent::from_memory(MemoryEventType::Updated, self.node.as_str(), &memory, clock);
        self.record_and_publish(event).await;
        Ok(())
    }

    /// Delete a memory locally and announce it to the cluster
    pub async fn delete_memory(&self, memory_id: &str, user_id: &str) -> Result<()> {
        self.store.delete(memory_id).await.map_err(|e| {
            MnemoError::Storage(format!("failed to delete memory locally: {}", e))
        })?;
        let clock = self.tick_clock();
        let event = MemoryEvent::deletion(self.node.as_str(), memory_id, user_id, clock);
        self.record_and_publish(event).await;
        Ok(())
    }

    /// Fetch a memory from the local store
    pub async fn get_memory(&self, memory_id: &str) -> Result<Memory> {
        self.store.get(memory_id).await
    }

    /// Apply an event received from another node
    ///
    /// Own events are discarded (echo suppression), unknown event types are
    /// logged and ignored, and create/update events go through the
    /// conflict resolver before reaching the store.
    pub async fn apply_remote_event(&self, event: &MemoryEvent) -> Result<()> {
        if event.node_id == self.node.as_str() {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event_id = %event.event_id, "suppressed own event");
            return Ok(());
        }

        self.merge_clock(&event.vector_clock);

        match event.event_type {
            MemoryEventType::Created | MemoryEventType::Updated => {
                let local = self.store.get(&event.memory_id).await.ok();
                if let Some(ref local) = local {
                    let diverging = self.resolver.detect_conflict(local, event);
                    if !diverging.is_empty() {
                        self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            memory_id = %event.memory_id,
                            fields = ?diverging,
                            "resolving conflicting remote event"
                        );
                    }
                }
                let resolved = self.resolver.resolve(local.as_ref(), event);
                self.store.upsert(resolved).await?;
            }
            MemoryEventType::Deleted => {
                // Redelivered deletes are expected; an absent memory is fine
                match self.store.delete(&event.memory_id).await {
                    Ok(()) | Err(MnemoError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            MemoryEventType::Unknown => {
                tracing::info!(
                    event_id = %event.event_id,
                    node_id = %event.node_id,
                    "ignoring unknown event type"
                );
                return Ok(());
            }
        }

        self.counters.applied.fetch_add(1, Ordering::Relaxed);
        *self.last_remote_applied.lock() = Some(Utc::now());
        Ok(())
    }

    /// Start the long-lived background consumer task
    ///
    /// The task is owned by this manager: it resubscribes with bounded
    /// backoff on transport failures and stops cleanly on [`shutdown`].
    ///
    /// [`shutdown`]: Self::shutdown
    pub fn start_consumer(self: &Arc<Self>) -> Result<()> {
        let broker = self
            .broker
            .clone()
            .ok_or(MnemoError::BrokerNotConfigured)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MnemoError::InvalidInput(
                "consumer already running".to_string(),
            ));
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let manager = Arc::clone(self);
        let topic = self.config.memory_events_topic.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            'outer: loop {
                let mut subscription = match broker.subscribe(&topic).await {
                    Ok(subscription) => {
                        attempt = 0;
                        subscription
                    }
                    Err(e) => {
                        let delay = manager.backoff_delay(attempt);
                        attempt = attempt.saturating_add(1);
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "subscribe failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue 'outer,
                            _ = shutdown_rx.recv() => break 'outer,
                        }
                    }
                };

                loop {
                    tokio::select! {
                        message = subscription.recv() => {
                            match message {
                                Some(message) => manager.handle_message(message).await,
                                None => {
                                    tracing::warn!("subscription closed, resubscribing");
                                    continue 'outer;
                                }
                            }
                        }
                        _ = shutdown_rx.recv() => break 'outer,
                    }
                }
            }
            manager.running.store(false, Ordering::SeqCst);
            tracing::info!(node_id = %manager.node, "event consumer stopped");
        });

        tracing::info!(node_id = %self.node, topic = %self.config.memory_events_topic, "event consumer started");
        Ok(())
    }

    /// Stop the background consumer and release its subscription
    pub async fn shutdown(&self) {
        let sender = self.shutdown_tx.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
    }

    /// Publish a synchronization request to the cluster
    ///
    /// Returns once the request is accepted by the log; convergence itself
    /// is asynchronous and eventual.
    pub async fn force_sync(&self) -> Result<()> {
        let broker = self
            .broker
            .as_ref()
            .ok_or(MnemoError::BrokerNotConfigured)?;

        let payload = serde_json::to_vec(&serde_json::json!({
            "node_id": self.node.as_str(),
            "timestamp": Utc::now(),
            "vector_clock": self.vector_clock(),
        }))?;
        let message = BrokerMessage::new(self.node.as_str(), payload)
            .with_header(HEADER_SYNC_REQUEST, "true");

        broker
            .publish(&self.config.memory_events_topic, message)
            .await
            .map_err(|e| MnemoError::Broker(format!("failed to publish sync request: {}", e)))?;

        tracing::info!(node_id = %self.node, "sync request published");
        Ok(())
    }

    /// Replication observability; reads only local state
    pub fn sync_status(&self) -> SyncStatus {
        let clock = self.vector_clock();
        let replication_lag_ms = self
            .last_remote_applied
            .lock()
            .map(|last| (Utc::now() - last).num_milliseconds());
        SyncStatus {
            node_id: self.node.as_str().to_string(),
            running: self.running.load(Ordering::SeqCst),
            broker_configured: self.broker.is_some(),
            resolver_configured: true,
            node_count: clock.len(),
            replication_lag_ms,
            events_applied: self.counters.applied.load(Ordering::Relaxed),
            events_suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            conflicts_detected: self.counters.conflicts.load(Ordering::Relaxed),
            subscriber_count: self.local_events.receiver_count(),
            event_count: self.log.len(),
            vector_clock: clock,
        }
    }

    /// Point-in-time dump of one user's memories plus the vector clock
    pub async fn create_snapshot(&self, user_id: &str) -> Result<MemorySnapshot> {
        let memories = self.store.search_by_user(user_id).await?;
        Ok(MemorySnapshot {
            snapshot_id: Uuid::new_v4().to_string(),
            node_id: self.node.as_str().to_string(),
            user_id: user_id.to_string(),
            memories,
            vector_clock: self.vector_clock(),
            timestamp: Utc::now(),
        })
    }

    fn tick_clock(&self) -> HashMap<String, i64> {
        let mut clock = self.clock.lock();
        *clock.entry(self.node.as_str().to_string()).or_insert(0) += 1;
        clock.clone()
    }

    fn merge_clock(&self, remote: &HashMap<String, i64>) {
        let mut clock = self.clock.lock();
        for (node, counter) in remote {
            let entry = clock.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(*counter);
        }
    }

    /// Record the event in the log, publish it, and notify local subscribers
    async fn record_and_publish(&self, event: MemoryEvent) {
        if let Err(e) = self.log.append(event.clone()) {
            tracing::warn!(event_id = %event.event_id, error = %e, "event log append failed");
        }

        if let Some(broker) = &self.broker {
            match serde_json::to_vec(&event) {
                Ok(payload) => {
                    let message = BrokerMessage::new(event.memory_id.clone(), payload);
                    if let Err(e) = broker
                        .publish(&self.config.memory_events_topic, message)
                        .await
                    {
                        tracing::warn!(
                            event_id = %event.event_id,
                            error = %e,
                            "event publish failed, local write remains authoritative"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.event_id, error = %e, "event serialization failed");
                }
            }
        } else {
            tracing::debug!(event_id = %event.event_id, "no broker configured, event not published");
        }

        let _ = self.local_events.send(event);
    }

    async fn handle_message(&self, message: BrokerMessage) {
        if message.header(HEADER_SYNC_REQUEST).is_some() {
            tracing::debug!(key = %message.key, "received sync request");
            return;
        }
        let event: MemoryEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(key = %message.key, error = %e, "dropping malformed event");
                return;
            }
        };
        if let Err(e) = self.apply_remote_event(&event).await {
            tracing::warn!(event_id = %event.event_id, error = %e, "failed to apply remote event");
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1);
        let capped = base
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.config.backoff_max_ms);
        Duration::from_millis(capped)
    }
}
