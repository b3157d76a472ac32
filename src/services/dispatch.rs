use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::domains::envelope::{encode_error, encode_success, Request};
use crate::domains::message::Message;
use crate::error::{Result, RpcError};
use crate::interfaces::transport::Transport;
use crate::registry::{split_method_name, MethodRegistry, Receiver};

pub struct ServiceBuilder {
    options: Options,
    registry: MethodRegistry,
}

impl ServiceBuilder {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            registry: MethodRegistry::new(),
        }
    }

    pub fn bind(mut self, receiver: Receiver) -> Result<Self> {
        let name = receiver.name().to_string();
        if !self.registry.register(receiver) {
            return Err(RpcError::Config(format!(
                "receiver '{name}' is already bound"
            )));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<Service> {
        self.options.validate()?;
        if self.registry.is_empty() {
            return Err(RpcError::Config("no receivers bound".to_string()));
        }
        Ok(Service {
            options: self.options,
            registry: Arc::new(self.registry),
        })
    }
}

/// Serves JSON-RPC requests from one subject. The registry is frozen at
/// build time and shared read-only with every in-flight request.
#[derive(Clone)]
pub struct Service {
    options: Options,
    registry: Arc<MethodRegistry>,
}

impl Service {
    pub fn builder(options: Options) -> ServiceBuilder {
        ServiceBuilder::new(options)
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Subscribes on the configured subject and serves until `cancel` fires.
    /// Responses are published by a separate task so a slow transport never
    /// stalls request intake beyond the outbound queue capacity.
    pub async fn serve(&self, transport: Arc<dyn Transport>, cancel: CancellationToken) -> Result<()> {
        let inbound = transport.subscribe(&self.options.subject).await?;
        let (outbound_tx, outbound_rx) = mpsc::channel(self.options.queue_capacity);
        let publisher_cancel = cancel.child_token();
        let publisher = tokio::spawn(publish_responses(
            transport,
            outbound_rx,
            publisher_cancel.clone(),
        ));

        info!(
            subject = %self.options.subject,
            methods = ?self.registry.list_methods(),
            "service started"
        );
        let result = self.start(cancel, inbound, outbound_tx).await;

        publisher_cancel.cancel();
        if let Err(err) = publisher.await {
            warn!(error = %err, "response publisher failed");
        }
        info!(subject = %self.options.subject, "service stopped");
        result
    }

    /// Runs the dispatch loop over the given queues.
    ///
    /// Cancellation is observed only while waiting for the next message, for
    /// a worker slot, or to enqueue a response; a request whose handler has
    /// started always runs to completion. Returns `Ok(())` on cancellation,
    /// even when inbound messages are still queued.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        mut inbound: mpsc::Receiver<Message>,
        outbound: mpsc::Sender<Message>,
    ) -> Result<()> {
        let outbox = Outbox {
            tx: outbound,
            cancel: cancel.clone(),
        };
        let slots = Arc::new(Semaphore::new(self.options.concurrency));
        let mut in_flight = JoinSet::new();

        let result = loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break Err(RpcError::Transport("inbound queue closed".to_string())),
                },
            };

            if self.options.concurrency == 1 {
                handle_message(&self.registry, &outbox, message).await;
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(err) => break Err(RpcError::Runtime(err.to_string())),
                },
            };
            let registry = self.registry.clone();
            let outbox = outbox.clone();
            in_flight.spawn(async move {
                handle_message(&registry, &outbox, message).await;
                drop(permit);
            });
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }
        };

        if !in_flight.is_empty() {
            debug!(in_flight = in_flight.len(), "draining in-flight requests");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
        result
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(error = %err, "request task failed");
    }
}

async fn handle_message(registry: &MethodRegistry, outbox: &Outbox, message: Message) {
    let Message {
        subject, reply_to, ..
    } = &message;

    let request = match Request::decode(&message.payload) {
        Ok(request) => request,
        Err(err) => {
            debug!(%subject, error = %err, "rejecting malformed request");
            outbox.send_error(reply_to, 0, &err).await;
            return;
        }
    };

    if let Err(err) = request.validate() {
        debug!(%subject, id = request.id, error = %err, "rejecting invalid request");
        outbox.send_error(reply_to, request.id, &err).await;
        return;
    }

    let (receiver, method) = split_method_name(&request.method);
    let Some(handler) = registry.get(receiver, method) else {
        let err = RpcError::MethodNotFound(request.method.clone());
        debug!(%subject, id = request.id, error = %err, "unknown method");
        outbox.send_error(reply_to, request.id, &err).await;
        return;
    };

    debug!(method = %request.method, id = request.id, "dispatching request");
    let outcome = match AssertUnwindSafe(handler.call(request.params()))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(method = %request.method, id = request.id, "handler panicked");
            Err(RpcError::Handler(format!("method {} panicked", request.method)))
        }
    };

    if request.is_notification() {
        if let Err(err) = outcome {
            debug!(method = %request.method, error = %err, "notification failed");
        }
        return;
    }

    match outcome {
        Ok(result) => outbox.send_result(reply_to, request.id, result).await,
        Err(err) => outbox.send_error(reply_to, request.id, &err).await,
    }
}

/// Cancellation-aware sender for the outbound queue. Every failure here is
/// logged and swallowed.
#[derive(Clone)]
struct Outbox {
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl Outbox {
    async fn send(&self, reply_to: &str, payload: Bytes) -> Result<()> {
        let message = Message::new(reply_to, payload);
        tokio::select! {
            biased;
            sent = self.tx.send(message) => sent.map_err(|e| RpcError::TransportSend(e.to_string())),
            _ = self.cancel.cancelled() => Err(RpcError::TransportSend("service is shutting down".to_string())),
        }
    }

    async fn send_result(&self, reply_to: &str, id: u64, result: Value) {
        let sent = match encode_success(id, result) {
            Ok(payload) => self.send(reply_to, payload).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            warn!(id, error = %err, "failed to send response, reporting error instead");
            self.send_error(reply_to, id, &err).await;
        }
    }

    async fn send_error(&self, reply_to: &str, id: u64, err: &RpcError) {
        let sent = match encode_error(id, err) {
            Ok(payload) => self.send(reply_to, payload).await,
            Err(encode_err) => Err(encode_err),
        };
        if let Err(send_err) = sent {
            warn!(id, error = %send_err, "dropping error response");
        }
    }
}

async fn publish_responses(
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        tokio::select! {
            biased;
            published = transport.publish(message) => {
                if let Err(err) = published {
                    warn!(error = %err, "failed to publish response");
                }
            }
            _ = cancel.cancelled() => {
                warn!("abandoning response publication on shutdown");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn failed_result_send_falls_back_then_gives_up() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outbox = Outbox {
            tx,
            cancel: CancellationToken::new(),
        };
        // Both the result and the fallback error fail to send; neither hangs.
        tokio::time::timeout(
            Duration::from_secs(1),
            outbox.send_result("_INBOX.1", 7, json!("lost")),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn full_queue_gives_up_on_cancel() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let outbox = Outbox {
            tx,
            cancel: cancel.clone(),
        };
        outbox.send_result("_INBOX.1", 1, json!("first")).await;

        let pending = tokio::spawn({
            let outbox = outbox.clone();
            async move { outbox.send_result("_INBOX.1", 2, json!("second")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.subject, "_INBOX.1");
        assert!(rx.try_recv().is_err());
    }
}
