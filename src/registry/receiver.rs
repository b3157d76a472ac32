use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::interfaces::handler::Handler;

/// Adapts an async function taking typed params into a [`Handler`].
///
/// Absent params are decoded as JSON `null`, so handlers that take `()` or an
/// `Option<_>` accept requests without a `params` member.
pub struct HandlerFn<P, F> {
    handler: F,
    _params: PhantomData<fn(P)>,
}

impl<P, F> HandlerFn<P, F> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _params: PhantomData,
        }
    }
}

#[async_trait]
impl<P, R, E, F, Fut> Handler for HandlerFn<P, F>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    async fn call(&self, params: Option<&RawValue>) -> Result<Value> {
        let raw = params.map(RawValue::get).unwrap_or("null");
        let params: P =
            serde_json::from_str(raw).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        let result = (self.handler)(params)
            .await
            .map_err(|e| RpcError::Handler(e.to_string()))?;
        serde_json::to_value(result).map_err(|e| RpcError::ResponseEncode(e.to_string()))
    }
}

/// A named group of methods, addressed on the wire as `receiver.method`.
/// An empty name registers flat methods addressed by their bare name.
#[derive(Clone)]
pub struct Receiver {
    name: String,
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl Receiver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method<P, R, E, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.handler(name, Arc::new(HandlerFn::new(handler)))
    }

    /// Registers a hand-written [`Handler`]. A later registration under the
    /// same name replaces the earlier one.
    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(method).cloned()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
