use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, RpcError};

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Runtime options for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub subject: String,
    /// Maximum number of requests handled at once. `1` keeps the loop
    /// strictly sequential.
    pub concurrency: usize,
    /// Capacity of the outbound response queue.
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            subject: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(RpcError::Config("subject not specified".to_string()));
        }
        if self.concurrency == 0 {
            return Err(RpcError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(RpcError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GossipConfig {
    pub listen_addrs: Option<Vec<String>>,
    pub bootstrap: Option<Vec<String>>,
    pub topic: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub subject: String,
    pub concurrency: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub gossip: Option<GossipConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| RpcError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| RpcError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn options(&self) -> Options {
        Options::new()
            .with_subject(self.subject.clone())
            .with_concurrency(self.concurrency.unwrap_or(DEFAULT_CONCURRENCY))
            .with_queue_capacity(self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY))
    }
}
