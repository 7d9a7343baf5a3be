use serde_json::{Map, Value};
use thiserror::Error;

use async_tungstenite::tungstenite;

/// Everything that can go wrong between this client and a router.
#[derive(Debug, Error)]
pub enum WampError {
    #[error("invalid router url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("rawsocket handshake failed: {0}")]
    Handshake(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("session aborted by router: {0}")]
    Aborted(String),

    #[error("router returned error {uri}")]
    Request {
        uri: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("connection closed")]
    ConnectionClosed,
}

pub type WampResult<T> = Result<T, WampError>;
