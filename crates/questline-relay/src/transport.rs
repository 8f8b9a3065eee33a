use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::RelayError;

/// Transport-specific handle identifying one delivery for acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckToken(pub String);

/// One message handed to a consumer, pending manual acknowledgment.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub token: AckToken,
}

/// Port for the external at-least-once pub/sub channel.
///
/// Ordering is guaranteed only within records sharing a partition key.
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &Envelope,
    ) -> Result<(), RelayError>;
}

/// A consumer-group subscription with manual acknowledgment.
///
/// `next` resolves to `None` only when the subscription is closed; unacked
/// deliveries are redelivered by the transport after a crash.
pub trait Subscription: Send {
    async fn next(&mut self) -> Result<Option<Delivery>, RelayError>;
    async fn ack(&mut self, token: &AckToken) -> Result<(), RelayError>;
}

// ── In-memory transport ───────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    /// Per-topic publish log, kept for assertions and at-most one consumer
    /// group receives live deliveries per (topic, group) pair.
    published: HashMap<String, Vec<Envelope>>,
    groups: HashMap<(String, String), mpsc::UnboundedSender<Delivery>>,
    acked: Vec<AckToken>,
    /// Topics whose publishes fail (test hook for transport outages).
    failing: Vec<String>,
    seq: u64,
}

/// In-process transport used by tests and single-node local runs.
///
/// Deliveries are only-new (a subscription sees envelopes published after it
/// was created), matching the Redis Streams `$` group semantics.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, topic: &str, group: &str) -> MemorySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.groups.insert((topic.to_owned(), group.to_owned()), tx);
        MemorySubscription {
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Everything published on `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.inner
            .lock()
            .unwrap()
            .published
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<AckToken> {
        self.inner.lock().unwrap().acked.clone()
    }

    /// Make every subsequent publish on `topic` fail.
    pub fn fail_topic(&self, topic: &str) {
        self.inner.lock().unwrap().failing.push(topic.to_owned());
    }

    pub fn restore_topic(&self, topic: &str) {
        self.inner.lock().unwrap().failing.retain(|t| t != topic);
    }
}

impl Transport for MemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        _partition_key: &str,
        envelope: &Envelope,
    ) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing.iter().any(|t| t == topic) {
            return Err(RelayError::Transport(anyhow!("topic {topic} unreachable")));
        }
        inner.seq += 1;
        let token = AckToken(format!("{topic}:{}", inner.seq));
        inner
            .published
            .entry(topic.to_owned())
            .or_default()
            .push(envelope.clone());
        let keys: Vec<(String, String)> = inner
            .groups
            .keys()
            .filter(|(t, _)| t == topic)
            .cloned()
            .collect();
        for key in keys {
            let delivery = Delivery {
                envelope: envelope.clone(),
                token: token.clone(),
            };
            // A closed receiver just means the group went away.
            let _ = inner.groups.get(&key).unwrap().send(delivery);
        }
        Ok(())
    }
}

pub struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    inner: Arc<Mutex<MemoryInner>>,
}

impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, RelayError> {
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self, token: &AckToken) -> Result<(), RelayError> {
        self.inner.lock().unwrap().acked.push(token.clone());
        Ok(())
    }
}
