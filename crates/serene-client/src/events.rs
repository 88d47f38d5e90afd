use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use serene_shared::{ChannelId, ConnectionState};
use serene_store::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// Events pushed to the front end.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UiEvent {
    ConnectionChanged {
        state: ConnectionState,
    },
    MessageReceived {
        message: Message,
    },
    MessageConfirmed {
        channel_id: ChannelId,
        local_id: Uuid,
    },
    ScrollToBottom {
        channel_id: ChannelId,
    },
    UnreadChanged {
        channel_id: ChannelId,
        unread_count: u32,
    },
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl UiEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

pub fn emit_event(ui_tx: &mpsc::Sender<UiEvent>, event: UiEvent) {
    if let Err(e) = ui_tx.try_send(event) {
        tracing::error!(error = %e, "Failed to emit event");
    }
}
