use tracing::debug;

use serene_shared::ChannelId;

use crate::error::{Result, StoreError};
use crate::models::{Channel, Message};

/// Known channels and the currently selected one.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
    selected: Option<ChannelId>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the channel list. The selection survives only if the selected
    /// channel is still listed.
    pub fn set_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
        if let Some(selected) = self.selected.as_ref() {
            if !self.channels.iter().any(|c| &c.id == selected) {
                debug!(channel = %selected, "Selected channel no longer listed");
                self.selected = None;
            }
        }
    }

    pub fn set_selected_channel(&mut self, channel_id: &ChannelId) -> Result<&Channel> {
        let channel = self
            .channels
            .iter()
            .find(|c| &c.id == channel_id)
            .ok_or_else(|| StoreError::ChannelNotFound(channel_id.clone()))?;
        self.selected = Some(channel_id.clone());
        Ok(channel)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&ChannelId> {
        self.selected.as_ref()
    }

    pub fn is_selected(&self, channel_id: &ChannelId) -> bool {
        self.selected.as_ref() == Some(channel_id)
    }

    /// Insert a channel, or rename an existing one keeping its counters.
    pub fn upsert(&mut self, channel: Channel) {
        match self.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => existing.name = channel.name,
            None => self.channels.push(channel),
        }
    }

    /// Record an incoming message: update the preview and, when
    /// `count_unread` is set and the channel is not selected, bump its unread
    /// count. Returns the channel's unread count, or `None` for an unknown
    /// channel.
    pub fn note_incoming(&mut self, message: &Message, count_unread: bool) -> Option<u32> {
        let selected = self.is_selected(&message.channel_id);
        let Some(channel) = self.get_mut(&message.channel_id) else {
            debug!(channel = %message.channel_id, "Message for unknown channel");
            return None;
        };

        channel.last_message = Some(message.preview());
        if count_unread && !selected {
            channel.unread_count = channel.unread_count.saturating_add(1);
        }
        Some(channel.unread_count)
    }

    pub fn mark_read(&mut self, channel_id: &ChannelId) -> Result<()> {
        let channel = self
            .get_mut(channel_id)
            .ok_or_else(|| StoreError::ChannelNotFound(channel_id.clone()))?;
        channel.unread_count = 0;
        Ok(())
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| &c.id == channel_id)
    }

    fn get_mut(&mut self, channel_id: &ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| &c.id == channel_id)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.selected = None;
    }
}
