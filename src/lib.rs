pub mod config;
pub mod domains;
pub mod error;
pub mod interfaces;
pub mod registry;
pub mod services;

pub use crate::config::{Config, Options};
pub use crate::domains::envelope::{Outcome, Request, Response};
pub use crate::domains::message::Message;
pub use crate::error::{Result, RpcError};
pub use crate::interfaces::handler::Handler;
pub use crate::interfaces::transport::Transport;
pub use crate::registry::{split_method_name, MethodRegistry, Receiver};
pub use crate::services::client::RpcClient;
pub use crate::services::dispatch::{Service, ServiceBuilder};
pub use crate::services::gossip::{GossipSettings, GossipTransport};
pub use crate::services::transport::MemoryTransport;
