use thiserror::Error;

use serene_shared::ProtocolError;

/// Errors produced by the hub transport and session.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Negotiation failed: {0}")]
    Negotiate(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection is not established")]
    NotConnected,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Hub invocation failed: {0}")]
    InvocationFailed(String),

    #[error("Connection attempt was cancelled")]
    Cancelled,

    #[error("Timed out waiting for the hub")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, NetError>;
