use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand_core::{OsRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::{to_raw_value, RawValue};
use serde_json::Value;

use crate::domains::envelope::{Request, Response};
use crate::domains::message::Message;
use crate::error::{Result, RpcError};
use crate::interfaces::transport::Transport;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Caller side of the protocol: publishes requests on a service subject and
/// waits on a private reply inbox.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    subject: String,
    timeout: Duration,
    inbox_prefix: String,
    next_id: AtomicU64,
    next_inbox: AtomicU64,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, subject: impl Into<String>) -> Self {
        Self {
            transport,
            subject: subject.into(),
            timeout: DEFAULT_TIMEOUT,
            inbox_prefix: format!("{:016x}", OsRng.next_u64()),
            next_id: AtomicU64::new(1),
            next_inbox: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let result = self.call_value(method, params).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Serialization(e.to_string()))
    }

    pub async fn call_value<P>(&self, method: &str, params: &P) -> Result<Value>
    where
        P: Serialize + ?Sized,
    {
        let id = self.next_id();
        let request = Request::new(id, method, Some(raw_params(params)?));
        let reply = self.request(request.encode()?).await.map_err(|err| match err {
            RpcError::Timeout(_) => RpcError::Timeout(method.to_string()),
            other => other,
        })?;
        let response = Response::decode(&reply.payload)?;
        if response.id != id {
            return Err(RpcError::Runtime(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        response.into_result()
    }

    /// Publishes a request with id `0`. No reply inbox is attached and no
    /// response is awaited.
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let request = Request::new(0, method, Some(raw_params(params)?));
        self.transport
            .publish(Message::new(self.subject.clone(), request.encode()?))
            .await
    }

    /// Publishes an arbitrary payload with a fresh reply inbox and returns
    /// the first reply.
    pub async fn request(&self, payload: Bytes) -> Result<Message> {
        let inbox = self.new_inbox();
        let mut replies = self.transport.subscribe(&inbox).await?;
        self.transport
            .publish(Message::new(self.subject.clone(), payload).with_reply_to(inbox.clone()))
            .await?;
        tokio::time::timeout(self.timeout, replies.recv())
            .await
            .map_err(|_| RpcError::Timeout(inbox))?
            .ok_or_else(|| RpcError::Transport("reply subscription closed".to_string()))
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_inbox(&self) -> String {
        format!(
            "_INBOX.{}.{}",
            self.inbox_prefix,
            self.next_inbox.fetch_add(1, Ordering::Relaxed)
        )
    }
}

fn raw_params<P: Serialize + ?Sized>(params: &P) -> Result<Box<RawValue>> {
    to_raw_value(params).map_err(|e| RpcError::Serialization(e.to_string()))
}
