use thiserror::Error;

use serene_net::NetError;
use serene_shared::EnvelopeError;
use serene_store::StoreError;

/// Errors from the REST collaborator.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Envelope(#[from] EnvelopeError),
}

/// Errors surfaced by [`crate::ChatContext`].
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Hub error: {0}")]
    Net(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No channel selected")]
    NoChannelSelected,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Chat state lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
