//! Broker abstraction for outbox delivery.
//!
//! The worker publishes through the [`Broker`] trait so tests can swap the
//! real NATS client for a recording mock. Messages carry the aggregate id in
//! a `Nats-Msg-Key` header so consumers can key per-aggregate exactly as
//! they would on a partitioned log.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Publish operations against the message bus.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `payload` to `topic`, keyed by `key`. Returns only after
    /// the broker has acknowledged receipt.
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<()>;
}

/// Real NATS-backed broker.
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub async fn connect(addrs: &str) -> Result<Self> {
        let client = async_nats::connect(addrs).await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Key", key);
        self.client
            .publish_with_headers(topic.to_string(), headers, payload)
            .await?;
        // The client buffers writes; flushing is what gives the
        // synchronous-with-ack contract the outbox worker relies on.
        self.client.flush().await?;
        Ok(())
    }
}

/// A published message captured by [`TestBroker`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
}

/// Broker mock that records published messages and can be told to fail,
/// for driving the worker's retry and dead-letter paths in tests.
#[derive(Default)]
pub struct TestBroker {
    published: RwLock<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every publish fails as if the broker were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_topic(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn publish_count_for(&self, topic: &str) -> usize {
        self.messages_for_topic(topic).len()
    }

    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Deserializes a captured payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        message: &PublishedMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&message.payload)
    }
}

#[async_trait]
impl Broker for TestBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("broker unavailable");
        }
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
            });
        Ok(())
    }
}
