use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domains::message::Message;
use crate::error::Result;

pub type Subscription = mpsc::Receiver<Message>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts delivering every message published on `subject`. Delivery stops
    /// once the returned receiver is dropped.
    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    async fn publish(&self, message: Message) -> Result<()>;
}
