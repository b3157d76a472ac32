//! JSON-RPC 2.0 request and response envelopes.
//!
//! Identifier `0` has two meanings on the wire: a request without an id is a
//! notification, and an error response with id `0` answers a request whose id
//! could not be decoded. Both are kept as-is for compatibility with existing
//! peers.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{Result, RpcError};

pub const VERSION: &str = "2.0";

fn is_zero(id: &u64) -> bool {
    *id == 0
}

/// An explicit JSON `null` reads as the field's zero value, same as absence.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "jsonrpc", default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_zero"
    )]
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            version: VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| RpcError::MalformedEnvelope(e.to_string()))
    }

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != VERSION {
            return Err(RpcError::UnsupportedVersion(self.version.clone()));
        }
        if self.method.is_empty() {
            return Err(RpcError::MissingMethod);
        }
        Ok(())
    }

    pub fn is_notification(&self) -> bool {
        self.id == 0
    }

    pub fn params(&self) -> Option<&RawValue> {
        self.params.as_deref()
    }
}

/// Exactly one of `result` or `error` ends up on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "jsonrpc")]
    pub version: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            version: VERSION.to_string(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: u64, err: &RpcError) -> Self {
        Self {
            version: VERSION.to_string(),
            id,
            outcome: Outcome::Error(err.to_string()),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| RpcError::MalformedEnvelope(e.to_string()))
    }

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RpcError::ResponseEncode(e.to_string()))
    }

    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(message) => Err(RpcError::Remote(message)),
        }
    }
}

pub fn encode_success(id: u64, result: Value) -> Result<Bytes> {
    Response::success(id, result).encode()
}

pub fn encode_error(id: u64, err: &RpcError) -> Result<Bytes> {
    Response::failure(id, err).encode()
}
