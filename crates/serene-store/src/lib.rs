//! # serene-store
//!
//! In-memory chat state: the per-channel message history and the channel
//! directory with unread bookkeeping. Both containers are synchronous and
//! meant to live behind the client's shared state mutex.

pub mod channels;
pub mod messages;
pub mod models;

mod error;

pub use channels::ChannelDirectory;
pub use error::{Result, StoreError};
pub use messages::{AddOutcome, MessageStore};
pub use models::*;
