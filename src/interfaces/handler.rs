use async_trait::async_trait;
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::Result;

/// A registered RPC method. Implementations decode `params` into their own
/// parameter type and return the encoded result.
///
/// Decode failures must be reported as `RpcError::InvalidParams` and
/// handler failures as `RpcError::Handler`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: Option<&RawValue>) -> Result<Value>;
}
