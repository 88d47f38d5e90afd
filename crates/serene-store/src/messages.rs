//! Per-channel message history with deduplication and a size bound.

use std::collections::HashMap;

use tracing::{debug, trace};
use uuid::Uuid;

use serene_shared::constants::DEFAULT_HISTORY_LIMIT;
use serene_shared::{ChannelId, MessageId};

use crate::error::{Result, StoreError};
use crate::models::{Delivery, Message};

/// What [`MessageStore::add_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended as a new entry.
    Added,
    /// A message with the same id is already stored; nothing changed.
    Duplicate,
    /// The message is the server echo of a pending local send, which is
    /// now confirmed in place.
    Confirmed(Uuid),
    /// The channel is full and the message was older than everything kept,
    /// so it was dropped again straight away.
    Evicted,
}

/// Messages of every known channel.
///
/// Entries are kept in arrival order; [`MessageStore::channel_messages`]
/// sorts on read.
#[derive(Debug)]
pub struct MessageStore {
    channels: HashMap<ChannelId, Vec<Message>>,
    index: HashMap<MessageId, ChannelId>,
    limit: usize,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `limit` messages per channel (pending local
    /// sends excepted).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            channels: HashMap::new(),
            index: HashMap::new(),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Replace the whole store.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.clear();
        for message in messages {
            self.add_message(message);
        }
    }

    /// Replace one channel's history with a freshly fetched page.
    ///
    /// Pending and failed local sends of that channel survive; a pending send
    /// echoed by the new history is confirmed. Confirmed entries newer than
    /// anything in the page (pushes that arrived while it was being fetched)
    /// are kept as well.
    pub fn replace_channel(&mut self, channel_id: &ChannelId, messages: Vec<Message>) {
        let newest_in_page = messages
            .iter()
            .filter(|m| m.channel_id == *channel_id)
            .filter_map(|m| m.timestamp)
            .max();
        let newer_than_page = |message: &Message| match (newest_in_page, message.timestamp) {
            (Some(newest), Some(ts)) => ts > newest,
            (None, _) => messages.is_empty(),
            (Some(_), None) => false,
        };

        let kept: Vec<Message> = match self.channels.remove(channel_id) {
            Some(entries) => {
                let (kept, dropped): (Vec<_>, Vec<_>) = entries
                    .into_iter()
                    .partition(|m| m.delivery != Delivery::Confirmed || newer_than_page(m));
                for message in dropped {
                    if let Some(id) = message.id {
                        self.index.remove(&id);
                    }
                }
                kept
            }
            None => Vec::new(),
        };
        if !kept.is_empty() {
            self.channels.insert(channel_id.clone(), kept);
        }

        for message in messages {
            if message.channel_id != *channel_id {
                debug!(expected = %channel_id, got = %message.channel_id, "Skipping history entry from another channel");
                continue;
            }
            self.add_message(message);
        }
    }

    /// Insert a message, deduplicating by id and reconciling the oldest
    /// matching pending local send.
    pub fn add_message(&mut self, message: Message) -> AddOutcome {
        if let Some(id) = message.id.as_ref() {
            if self.index.contains_key(id) {
                trace!(message = %id, "Duplicate message ignored");
                return AddOutcome::Duplicate;
            }
        }

        let channel_id = message.channel_id.clone();
        let entries = self.channels.entry(channel_id.clone()).or_default();

        if message.local_id.is_none() {
            // Entries are appended in order, so the first match is the oldest.
            if let Some(pos) = entries
                .iter()
                .position(|m| m.is_pending() && m.same_payload(&message))
            {
                let local_id = entries[pos].local_id;
                if let Some(id) = message.id.clone() {
                    self.index.insert(id, channel_id);
                }
                entries[pos] = Message {
                    local_id,
                    delivery: Delivery::Confirmed,
                    ..message
                };
                if let Some(local_id) = local_id {
                    return AddOutcome::Confirmed(local_id);
                }
                return AddOutcome::Added;
            }
        }

        if let Some(id) = message.id.clone() {
            self.index.insert(id, channel_id.clone());
        }
        entries.push(message);
        let newest = entries.len() - 1;
        if self.evict(&channel_id, newest) {
            debug!(channel = %channel_id, "Message older than a full history, not kept");
            return AddOutcome::Evicted;
        }
        AddOutcome::Added
    }

    /// Record an optimistic local send and return its correlation id.
    pub fn add_pending(&mut self, mut message: Message) -> Uuid {
        let local_id = *message.local_id.get_or_insert_with(Uuid::new_v4);
        message.id = None;
        message.delivery = Delivery::Pending;
        self.channels
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
        local_id
    }

    /// Flag a pending local send as failed.
    pub fn mark_failed(&mut self, local_id: Uuid) -> Result<()> {
        let message = self
            .channels
            .values_mut()
            .flat_map(|entries| entries.iter_mut())
            .find(|m| m.local_id == Some(local_id))
            .ok_or(StoreError::LocalMessageNotFound(local_id))?;

        if message.is_pending() {
            message.delivery = Delivery::Failed;
        }
        Ok(())
    }

    /// A channel's messages in display order: by timestamp ascending, with
    /// messages lacking a timestamp last, ties kept in arrival order.
    pub fn channel_messages(&self, channel_id: &ChannelId) -> Vec<Message> {
        let mut messages = self.channels.get(channel_id).cloned().unwrap_or_default();
        messages.sort_by_key(display_key);
        messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let channel_id = self.index.get(id)?;
        self.channels
            .get(channel_id)?
            .iter()
            .find(|m| m.id.as_ref() == Some(id))
    }

    pub fn find_local(&self, local_id: Uuid) -> Option<&Message> {
        self.channels
            .values()
            .flat_map(|entries| entries.iter())
            .find(|m| m.local_id == Some(local_id))
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn channel_len(&self, channel_id: &ChannelId) -> usize {
        self.channels.get(channel_id).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.index.clear();
    }

    /// Trim a channel back to the limit. Returns whether the entry at
    /// position `watched` was among those removed.
    fn evict(&mut self, channel_id: &ChannelId, mut watched: usize) -> bool {
        let Some(entries) = self.channels.get_mut(channel_id) else {
            return false;
        };

        while entries.len() > self.limit {
            let oldest = entries
                .iter()
                .enumerate()
                .filter(|(_, m)| !m.is_pending())
                .min_by_key(|(_, m)| display_key(m))
                .map(|(pos, _)| pos);

            let Some(pos) = oldest else {
                break;
            };
            let evicted = entries.remove(pos);
            if let Some(id) = evicted.id {
                self.index.remove(&id);
            }
            debug!(channel = %channel_id, "Evicted oldest message from history");

            if pos == watched {
                return true;
            }
            if pos < watched {
                watched -= 1;
            }
        }
        false
    }
}

fn display_key(message: &Message) -> (bool, Option<chrono::DateTime<chrono::Utc>>) {
    (message.timestamp.is_none(), message.timestamp)
}
