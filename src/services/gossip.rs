use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use libp2p::gossipsub::{
    self, AllowAllSubscriptionFilter, IdentTopic, IdentityTransform, MessageAuthenticity,
    ValidationMode,
};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identity, noise, tcp, yamux, Multiaddr, PeerId, Swarm, Transport as _};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{GossipConfig, DEFAULT_QUEUE_CAPACITY};
use crate::domains::message::Message;
use crate::error::{Result as GossipResult, RpcError};
use crate::interfaces::transport::{Subscription, Transport};

pub const DEFAULT_TOPIC: &str = "pubsub-jsonrpc";
pub const DEFAULT_KEY_PATH: &str = "./data/gossip.key";

/// One pub/sub message as carried on the shared gossipsub topic. Subjects
/// are addressed inside the frame; the topic itself is only the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipFrame {
    pub subject: String,
    #[serde(default)]
    pub reply_to: String,
    pub payload: String,
}

impl GossipFrame {
    pub fn from_message(message: &Message) -> Self {
        Self {
            subject: message.subject.clone(),
            reply_to: message.reply_to.clone(),
            payload: BASE64.encode(&message.payload),
        }
    }

    pub fn into_message(self) -> GossipResult<Message> {
        let payload = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|e| RpcError::Serialization(e.to_string()))?;
        Ok(Message::new(self.subject, payload).with_reply_to(self.reply_to))
    }
}

#[derive(Debug, Clone)]
pub struct GossipSettings {
    pub listen_addrs: Vec<Multiaddr>,
    pub bootstrap: Vec<Multiaddr>,
    pub topic: String,
    pub key_path: String,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            bootstrap: Vec::new(),
            topic: DEFAULT_TOPIC.to_string(),
            key_path: DEFAULT_KEY_PATH.to_string(),
        }
    }
}

impl GossipSettings {
    pub fn from_config(config: &GossipConfig) -> GossipResult<Self> {
        Ok(Self {
            listen_addrs: parse_addrs(config.listen_addrs.as_deref().unwrap_or_default())?,
            bootstrap: parse_addrs(config.bootstrap.as_deref().unwrap_or_default())?,
            topic: config
                .topic
                .clone()
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            key_path: config
                .key_path
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_PATH.to_string()),
        })
    }
}

pub fn parse_addrs(addrs: &[String]) -> GossipResult<Vec<Multiaddr>> {
    addrs
        .iter()
        .map(|addr| {
            addr.parse::<Multiaddr>()
                .map_err(|e| RpcError::Config(format!("invalid multiaddr '{addr}': {e}")))
        })
        .collect()
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "AppBehaviourEvent")]
struct AppBehaviour {
    gossipsub: gossipsub::Behaviour<IdentityTransform, AllowAllSubscriptionFilter>,
}

enum AppBehaviourEvent {
    Gossipsub(gossipsub::Event),
}

impl From<gossipsub::Event> for AppBehaviourEvent {
    fn from(event: gossipsub::Event) -> Self {
        Self::Gossipsub(event)
    }
}

/// Pub/sub transport over a libp2p gossipsub topic. Frames published here
/// are also delivered to local subscribers, since gossipsub never echoes a
/// node's own messages back to it.
#[derive(Clone)]
pub struct GossipTransport {
    publish_tx: mpsc::Sender<Vec<u8>>,
    frame_tx: broadcast::Sender<GossipFrame>,
    pub peer_id: PeerId,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
}

impl GossipTransport {
    pub async fn start(settings: GossipSettings, cancel: CancellationToken) -> GossipResult<Self> {
        let local_key = load_or_create_keypair(&settings.key_path)?;
        let peer_id = PeerId::from(local_key.public());

        let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
            .upgrade(libp2p::core::upgrade::Version::V1Lazy)
            .authenticate(
                noise::Config::new(&local_key).map_err(|e| RpcError::Transport(e.to_string()))?,
            )
            .multiplex(yamux::Config::default())
            .boxed();

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .validation_mode(ValidationMode::Strict)
            .heartbeat_interval(Duration::from_secs(10))
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let mut gossip = gossipsub::Behaviour::<IdentityTransform, AllowAllSubscriptionFilter>::new(
            MessageAuthenticity::Signed(local_key.clone()),
            gossipsub_config,
        )
        .map_err(|e| RpcError::Transport(e.to_string()))?;

        let topic = IdentTopic::new(settings.topic.as_str());
        gossip
            .subscribe(&topic)
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let mut swarm = Swarm::new(
            transport,
            AppBehaviour { gossipsub: gossip },
            peer_id,
            libp2p::swarm::Config::with_tokio_executor(),
        );

        for addr in settings.listen_addrs {
            swarm
                .listen_on(addr)
                .map_err(|e| RpcError::Transport(e.to_string()))?;
        }

        for addr in settings.bootstrap {
            if let Err(err) = swarm.dial(addr.clone()) {
                warn!(%addr, error = %err, "failed to dial bootstrap peer");
            }
        }

        let (publish_tx, mut publish_rx) = mpsc::channel::<Vec<u8>>(DEFAULT_QUEUE_CAPACITY);
        let (frame_tx, _) = broadcast::channel::<GossipFrame>(256);
        let frame_tx_task = frame_tx.clone();
        let listen_addrs = Arc::new(RwLock::new(Vec::<Multiaddr>::new()));
        let listen_addrs_task = listen_addrs.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(data) = publish_rx.recv() => {
                        if let Err(err) = swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(topic.clone(), data)
                        {
                            debug!(error = %err, "gossip frame not forwarded to peers");
                        }
                    }
                    event = swarm.select_next_some() => {
                        match event {
                            SwarmEvent::Behaviour(AppBehaviourEvent::Gossipsub(
                                gossipsub::Event::Message { message, .. },
                            )) => {
                                match serde_json::from_slice::<GossipFrame>(&message.data) {
                                    Ok(frame) => {
                                        let _ = frame_tx_task.send(frame);
                                    }
                                    Err(err) => debug!(error = %err, "ignoring undecodable gossip frame"),
                                }
                            }
                            SwarmEvent::NewListenAddr { address, .. } => {
                                let mut list = listen_addrs_task.write().await;
                                if !list.iter().any(|addr| addr == &address) {
                                    list.push(address);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("gossip swarm stopped");
        });

        Ok(Self {
            publish_tx,
            frame_tx,
            peer_id,
            listen_addrs,
        })
    }

    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        let list = self.listen_addrs.read().await;
        list.clone()
    }
}

#[async_trait]
impl Transport for GossipTransport {
    async fn subscribe(&self, subject: &str) -> GossipResult<Subscription> {
        if subject.is_empty() {
            return Err(RpcError::Config(
                "cannot subscribe to an empty subject".to_string(),
            ));
        }
        let mut frames = self.frame_tx.subscribe();
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let subject = subject.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    frame = frames.recv() => match frame {
                        Ok(frame) if frame.subject == subject => match frame.into_message() {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => debug!(%subject, error = %err, "dropping gossip frame"),
                        },
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(%subject, skipped, "gossip subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, message: Message) -> GossipResult<()> {
        if message.subject.is_empty() {
            debug!("dropping message without a subject");
            return Ok(());
        }
        let frame = GossipFrame::from_message(&message);
        let data =
            serde_json::to_vec(&frame).map_err(|e| RpcError::Serialization(e.to_string()))?;
        // Err only means there is no local subscriber right now.
        let _ = self.frame_tx.send(frame);
        self.publish_tx
            .send(data)
            .await
            .map_err(|e| RpcError::TransportSend(e.to_string()))
    }
}

fn load_or_create_keypair(path: &str) -> GossipResult<identity::Keypair> {
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }

    if let Ok(encoded) = fs::read_to_string(path) {
        if let Ok(raw) = BASE64.decode(encoded.trim()) {
            if let Ok(keypair) = identity::Keypair::from_protobuf_encoding(&raw) {
                return Ok(keypair);
            }
        }
        warn!(path, "ignoring unreadable gossip key, generating a new one");
    }

    let keypair = identity::Keypair::generate_ed25519();
    let encoded = keypair
        .to_protobuf_encoding()
        .map(|raw| BASE64.encode(raw))
        .map_err(|e| RpcError::Transport(e.to_string()))?;
    fs::write(path, encoded).map_err(|e| RpcError::Config(e.to_string()))?;
    Ok(keypair)
}
