mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use pubsub_jsonrpc::domains::message::Message;
use pubsub_jsonrpc::interfaces::transport::Transport;
use pubsub_jsonrpc::services::client::RpcClient;
use pubsub_jsonrpc::services::gossip::{GossipSettings, GossipTransport};

use common::{build_service, EchoParams, EchoResult, SUBJECT};

async fn start_node(cancel: CancellationToken) -> (GossipTransport, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let settings = GossipSettings {
        listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
        key_path: dir.path().join("gossip.key").to_string_lossy().to_string(),
        ..GossipSettings::default()
    };
    let transport = GossipTransport::start(settings, cancel).await.unwrap();
    (transport, dir)
}

#[tokio::test]
async fn local_subscribers_see_local_publications() {
    let cancel = CancellationToken::new();
    let (transport, _dir) = start_node(cancel.clone()).await;

    let mut inbox = transport.subscribe("inbox.a").await.unwrap();
    let mut other = transport.subscribe("inbox.b").await.unwrap();
    transport
        .publish(Message::new("inbox.a", "payload").with_reply_to("inbox.reply"))
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.subject, "inbox.a");
    assert_eq!(message.reply_to, "inbox.reply");
    assert_eq!(&message.payload[..], b"payload");
    assert!(other.try_recv().is_err());

    cancel.cancel();
}

#[tokio::test]
async fn listen_address_is_reported() {
    let cancel = CancellationToken::new();
    let (transport, _dir) = start_node(cancel.clone()).await;

    let mut addrs = Vec::new();
    for _ in 0..100 {
        addrs = transport.listen_addrs().await;
        if !addrs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!addrs.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn service_answers_over_gossip_loopback() {
    let cancel = CancellationToken::new();
    let (transport, _dir) = start_node(cancel.clone()).await;
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let service = build_service(1, Default::default());
    let serve_transport = transport.clone();
    let serve_cancel = cancel.clone();
    let handle = tokio::spawn(async move { service.serve(serve_transport, serve_cancel).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = RpcClient::new(transport, SUBJECT).with_timeout(Duration::from_secs(5));
    let result: EchoResult = client
        .call(
            "Echo.Echo",
            &EchoParams {
                message: "hello world!".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(result.message, "hello world!");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
