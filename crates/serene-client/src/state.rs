//! Chat state shared between the context and the dispatcher task.
//!
//! [`ChatState`] lives behind `Arc<Mutex<>>`; the lock is never held across
//! an await point.

use std::sync::{Arc, Mutex, MutexGuard};

use serene_shared::UserId;
use serene_store::{ChannelDirectory, MessageStore};

use crate::api::ChatUser;
use crate::error::{ClientError, Result};

pub type SharedState = Arc<Mutex<ChatState>>;

/// Everything the chat views render from.
#[derive(Debug)]
pub struct ChatState {
    /// Logged-in user. `None` until the context is started.
    pub user_id: Option<UserId>,

    /// Message history of every channel seen this session.
    pub messages: MessageStore,

    /// Channel list, unread counters and the selected channel.
    pub channels: ChannelDirectory,

    /// Users available for new channels.
    pub users: Vec<ChatUser>,
}

impl ChatState {
    pub fn new(history_limit: usize) -> Self {
        Self {
            user_id: None,
            messages: MessageStore::with_limit(history_limit),
            channels: ChannelDirectory::new(),
            users: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.user_id = None;
        self.messages.clear();
        self.channels.clear();
        self.users.clear();
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            user_id: None,
            messages: MessageStore::new(),
            channels: ChannelDirectory::new(),
            users: Vec::new(),
        }
    }
}

pub fn lock_state(state: &SharedState) -> Result<MutexGuard<'_, ChatState>> {
    state.lock().map_err(|_| ClientError::LockPoisoned)
}
