#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pubsub_jsonrpc::config::Options;
use pubsub_jsonrpc::domains::envelope::Response;
use pubsub_jsonrpc::domains::message::Message;
use pubsub_jsonrpc::error::Result;
use pubsub_jsonrpc::registry::Receiver;
use pubsub_jsonrpc::services::dispatch::Service;

pub const SUBJECT: &str = "test_service.rpc";
pub const REPLY: &str = "_INBOX.test";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoParams {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoResult {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepParams {
    pub millis: u64,
    pub tag: String,
}

/// Receivers used across the dispatch tests. `calls` counts every handler
/// invocation on the `Log` receiver.
pub fn test_receivers(calls: Arc<AtomicUsize>) -> Vec<Receiver> {
    let echo = Receiver::new("Echo")
        .method("Echo", |params: EchoParams| async move {
            Ok::<_, String>(EchoResult {
                message: params.message,
            })
        })
        .method("Fail", |_: Value| async {
            Err::<Value, _>("echo failed".to_string())
        })
        .method("Sleep", |params: SleepParams| async move {
            tokio::time::sleep(Duration::from_millis(params.millis)).await;
            Ok::<_, String>(params.tag)
        });

    let record_calls = calls.clone();
    let fail_calls = calls;
    let log = Receiver::new("Log")
        .method("Record", move |_: Value| {
            let calls = record_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(true)
            }
        })
        .method("Reject", move |_: Value| {
            let calls = fail_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<bool, _>("rejected".to_string())
            }
        });

    let flat = Receiver::new("")
        .method("Ping", |_: Value| async { Ok::<_, String>("pong") })
        .method("Boom", |params: Value| async move {
            if params.is_null() {
                panic!("boom");
            }
            Ok::<_, String>(params)
        })
        .method("Unencodable", |_: Value| async {
            // JSON object keys must be strings.
            Ok::<_, String>(BTreeMap::from([((1u8, 2u8), true)]))
        });

    vec![echo, log, flat]
}

pub fn build_service(concurrency: usize, calls: Arc<AtomicUsize>) -> Service {
    let options = Options::new()
        .with_subject(SUBJECT)
        .with_concurrency(concurrency);
    test_receivers(calls)
        .into_iter()
        .try_fold(Service::builder(options), |builder, receiver| builder.bind(receiver))
        .unwrap()
        .build()
        .unwrap()
}

/// A dispatch loop running over raw channels.
pub struct Harness {
    pub inbound: mpsc::Sender<Message>,
    pub outbound: mpsc::Receiver<Message>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<()>>,
    pub calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn start(concurrency: usize) -> Self {
        Self::start_with_capacity(concurrency, 16)
    }

    pub fn start_with_capacity(concurrency: usize, outbound_capacity: usize) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = build_service(concurrency, calls.clone());
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { service.start(loop_cancel, inbound_rx, outbound_tx).await });
        Self {
            inbound: inbound_tx,
            outbound: outbound_rx,
            cancel,
            handle,
            calls,
        }
    }

    pub async fn send(&self, payload: &str) {
        let message = Message::new(SUBJECT, payload.to_string()).with_reply_to(REPLY);
        self.inbound.send(message).await.unwrap();
    }

    pub async fn next_message(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a response")
            .expect("outbound queue closed")
    }

    pub async fn next_response(&mut self) -> (Response, Value) {
        let message = self.next_message().await;
        assert_eq!(message.subject, REPLY);
        let response = Response::decode(&message.payload).unwrap();
        let wire: Value = serde_json::from_slice(&message.payload).unwrap();
        (response, wire)
    }

    /// Asserts nothing else arrives on the outbound queue.
    pub async fn assert_quiet(&mut self) {
        if let Ok(extra) =
            tokio::time::timeout(Duration::from_millis(50), self.outbound.recv()).await
        {
            panic!("unexpected outbound message {extra:?}");
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), &mut self.handle)
            .await
            .expect("dispatch loop did not stop")
            .expect("dispatch task panicked")
    }
}
