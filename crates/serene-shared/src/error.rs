use thiserror::Error;

/// Errors raised while encoding or decoding hub protocol records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON in hub record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hub record is not a JSON object")]
    NotAnObject,

    #[error("Hub record has no message type")]
    MissingType,

    #[error("Unsupported hub message type: {0}")]
    UnsupportedType(u64),

    #[error("Handshake rejected by hub: {0}")]
    HandshakeRejected(String),
}

/// Errors raised when unwrapping a REST response envelope.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Response carried no data")]
    MissingData,
}
