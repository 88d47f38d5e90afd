//! Types shared by every Serene crate: identifiers, the SignalR JSON hub
//! protocol, the REST response envelope and protocol constants.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod types;

pub use envelope::{ApiEnvelope, ApiResult};
pub use error::{EnvelopeError, ProtocolError};
pub use protocol::{ChatMessage, FrameDecoder, HubMessage};
pub use types::{ChannelId, ConnectionState, MessageId, UserId};
