use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported RPC version '{0}'")]
    UnsupportedVersion(String),
    #[error("RPC method was not specified")]
    MissingMethod,
    #[error("method {0} is not defined")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Handler(String),
    #[error("response encoding failed: {0}")]
    ResponseEncode(String),
    #[error("transport send failed: {0}")]
    TransportSend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out waiting for response to {0}")]
    Timeout(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
