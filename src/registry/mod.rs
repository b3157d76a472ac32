mod receiver;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::interfaces::handler::Handler;

pub use receiver::{HandlerFn, Receiver};

/// Splits a wire method name on its first `.`. Names without a separator
/// resolve to the flat receiver `""`.
pub fn split_method_name(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((receiver, method)) => (receiver, method),
        None => ("", name),
    }
}

fn qualified_name(receiver: &str, method: &str) -> String {
    if receiver.is_empty() {
        method.to_string()
    } else {
        format!("{receiver}.{method}")
    }
}

/// Receivers keyed by name. Filled before dispatch starts and only read
/// afterwards, so lookups need no locking.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    receivers: HashMap<String, Receiver>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            receivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, receiver: Receiver) -> bool {
        if self.receivers.contains_key(receiver.name()) {
            return false;
        }
        self.receivers.insert(receiver.name().to_string(), receiver);
        true
    }

    pub fn is_defined(&self, receiver: &str, method: &str) -> bool {
        self.get(receiver, method).is_some()
    }

    pub fn get(&self, receiver: &str, method: &str) -> Option<Arc<dyn Handler>> {
        self.receivers.get(receiver).and_then(|r| r.get(method))
    }

    pub async fn invoke(
        &self,
        receiver: &str,
        method: &str,
        params: Option<&RawValue>,
    ) -> Result<Value> {
        let handler = self
            .get(receiver, method)
            .ok_or_else(|| RpcError::MethodNotFound(qualified_name(receiver, method)))?;
        handler.call(params).await
    }

    pub fn list_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .receivers
            .values()
            .flat_map(|r| r.method_names().map(|m| qualified_name(r.name(), m)))
            .collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.values().all(Receiver::is_empty)
    }
}
