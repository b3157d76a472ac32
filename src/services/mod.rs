pub mod client;
pub mod dispatch;
pub mod gossip;
pub mod transport;
