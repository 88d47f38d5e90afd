//! Chat domain models held by the store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use serene_shared::constants::MESSAGE_TYPE_TEXT;
use serene_shared::protocol::parse_timestamp;
use serene_shared::{ChannelId, ChatMessage, MessageId, UserId};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A conversation channel as listed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default)]
    pub name: String,
    /// Messages received while the channel was not selected.
    #[serde(default)]
    pub unread_count: u32,
    /// Preview of the most recent message.
    #[serde(default)]
    pub last_message: Option<String>,
}

impl Channel {
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unread_count: 0,
            last_message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Local delivery state of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Sent by this client, server echo not seen yet.
    Pending,
    /// Known to the server.
    #[default]
    Confirmed,
    /// The send invocation failed.
    Failed,
}

/// A chat message as kept in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id; absent for unconfirmed local sends.
    pub id: Option<MessageId>,
    /// Correlation id of a locally sent message.
    pub local_id: Option<Uuid>,
    pub channel_id: ChannelId,
    pub sender: UserId,
    pub content: String,
    pub message_type: String,
    pub file_url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery: Delivery,
}

impl Message {
    /// Convert a hub or history payload. An unparseable timestamp is logged
    /// and dropped.
    pub fn from_wire(wire: ChatMessage) -> Self {
        let timestamp = wire
            .timestamp
            .as_deref()
            .and_then(|raw| match parse_timestamp(raw) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!(timestamp = raw, error = %e, "Ignoring unparseable message timestamp");
                    None
                }
            });

        Self {
            id: wire.id,
            local_id: None,
            channel_id: wire.channel_id,
            sender: wire.sender,
            content: wire.content,
            message_type: wire.message_type,
            file_url: wire.file_url,
            timestamp,
            delivery: Delivery::Confirmed,
        }
    }

    /// An optimistic local send with a fresh correlation id.
    pub fn pending(
        channel_id: ChannelId,
        sender: UserId,
        content: impl Into<String>,
        message_type: impl Into<String>,
        file_url: Option<String>,
    ) -> Self {
        Self {
            id: None,
            local_id: Some(Uuid::new_v4()),
            channel_id,
            sender,
            content: content.into(),
            message_type: message_type.into(),
            file_url,
            timestamp: None,
            delivery: Delivery::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Pending
    }

    /// True when `other` carries the same payload, i.e. it could be the
    /// server echo of this message.
    pub fn same_payload(&self, other: &Message) -> bool {
        self.channel_id == other.channel_id
            && self.sender == other.sender
            && self.content == other.content
            && self.message_type == other.message_type
            && self.file_url == other.file_url
    }

    /// Text shown as a channel's last message.
    pub fn preview(&self) -> String {
        if self.message_type == MESSAGE_TYPE_TEXT || !self.content.is_empty() {
            self.content.clone()
        } else {
            format!("[{}]", self.message_type)
        }
    }
}
