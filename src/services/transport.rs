use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::config::DEFAULT_QUEUE_CAPACITY;
use crate::domains::message::Message;
use crate::error::{Result, RpcError};
use crate::interfaces::transport::{Subscription, Transport};

/// In-process subject broker. Every live subscriber of a subject receives
/// its own copy of each message published there.
#[derive(Clone)]
pub struct MemoryTransport {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Message>>>>>,
    capacity: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscriber_count(&self, subject: &str) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(subject)
            .map(|list| list.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        if subject.is_empty() {
            return Err(RpcError::Config(
                "cannot subscribe to an empty subject".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.write().await;
        // Short-lived reply inboxes are never published to once their caller
        // gives up, so closed subscriptions are swept here as well.
        subscribers.retain(|_, list| {
            list.retain(|tx| !tx.is_closed());
            !list.is_empty()
        });
        subscribers.entry(subject.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn publish(&self, message: Message) -> Result<()> {
        if message.subject.is_empty() {
            debug!("dropping message without a subject");
            return Ok(());
        }
        let targets = {
            let mut subscribers = self.subscribers.write().await;
            let targets = match subscribers.get_mut(&message.subject) {
                Some(list) => {
                    list.retain(|tx| !tx.is_closed());
                    list.clone()
                }
                None => Vec::new(),
            };
            if targets.is_empty() {
                subscribers.remove(&message.subject);
            }
            targets
        };
        if targets.is_empty() {
            debug!(subject = %message.subject, "no subscribers for message");
        }
        for tx in targets {
            // A subscriber that went away between the snapshot and the send
            // is simply skipped.
            let _ = tx.send(message.clone()).await;
        }
        Ok(())
    }
}
