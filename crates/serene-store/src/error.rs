use serene_shared::ChannelId;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the store layer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The channel is not in the directory.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// No locally sent message carries this correlation id.
    #[error("Local message not found: {0}")]
    LocalMessageNotFound(Uuid),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
