use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pubsub_jsonrpc::config::{Config, GossipConfig, Options};
use pubsub_jsonrpc::error::{Result, RpcError};
use pubsub_jsonrpc::services::gossip::{GossipSettings, GossipTransport};
use pubsub_jsonrpc::{Receiver, Service};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pubsub-jsonrpcd")]
#[command(about = "JSON-RPC 2.0 echo service over gossipsub")]
struct Cli {
    /// JSON config file; replaces the subject and gossip flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "PUBSUB_JSONRPC_SUBJECT", default_value = "rpc.echo")]
    subject: String,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    #[arg(long = "listen", default_value = "/ip4/0.0.0.0/tcp/0")]
    listen: Vec<String>,

    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,

    #[arg(long, default_value = "pubsub-jsonrpc")]
    topic: String,

    #[arg(long, env = "PUBSUB_JSONRPC_KEY_PATH", default_value = "./data/gossip.key")]
    key_path: String,
}

impl Cli {
    fn resolve(&self) -> Result<(Options, GossipSettings)> {
        let flags = GossipConfig {
            listen_addrs: Some(self.listen.clone()),
            bootstrap: Some(self.bootstrap.clone()),
            topic: Some(self.topic.clone()),
            key_path: Some(self.key_path.clone()),
        };
        match &self.config {
            Some(path) => {
                let config = Config::from_file(path)?;
                let gossip = config.gossip.clone().unwrap_or(flags);
                Ok((config.options(), GossipSettings::from_config(&gossip)?))
            }
            None => {
                let options = Options::new()
                    .with_subject(self.subject.clone())
                    .with_concurrency(self.concurrency);
                Ok((options, GossipSettings::from_config(&flags)?))
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoMessage {
    message: String,
}

fn echo_receiver() -> Receiver {
    Receiver::new("Echo").method("Echo", |params: EchoMessage| async move {
        Ok::<_, RpcError>(params)
    })
}

fn flat_receiver() -> Receiver {
    Receiver::new("").method("Ping", |_: Value| async { Ok::<_, RpcError>("pong") })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pubsub_jsonrpc=info,libp2p_gossipsub=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let (options, settings) = cli.resolve()?;
    let service = Service::builder(options)
        .bind(echo_receiver())?
        .bind(flat_receiver())?
        .build()?;

    let cancel = CancellationToken::new();
    let transport = GossipTransport::start(settings, cancel.clone()).await?;
    info!(peer_id = %transport.peer_id, "gossip transport started");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        shutdown.cancel();
    });

    service.serve(Arc::new(transport), cancel).await
}
