//! The application-level chat object.
//!
//! A [`ChatContext`] is constructed explicitly by the front end and owns the
//! hub session, the REST client, the shared chat state and the dispatcher
//! task for one logged-in user.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use serene_net::{HubSession, NetError};
use serene_shared::constants::MESSAGE_TYPE_TEXT;
use serene_shared::{ChannelId, ConnectionState, UserId};
use serene_store::{Channel, Message};

use crate::api::{ApiClient, ChatUser};
use crate::config::ClientConfig;
use crate::dispatcher::{rejoin_channel, Dispatcher};
use crate::error::{ClientError, Result};
use crate::events::{emit_event, UiEvent};
use crate::state::{lock_state, ChatState, SharedState};

pub struct ChatContext {
    session: HubSession,
    api: ApiClient,
    state: SharedState,
    ui_tx: mpsc::Sender<UiEvent>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ChatContext {
    pub fn new(config: &ClientConfig, ui_tx: mpsc::Sender<UiEvent>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Api(e.into()))?;
        let session = HubSession::with_http_client(config.hub_config(), http.clone());
        let api = ApiClient::new(http, &config.api_url)?;

        Ok(Self {
            session,
            api,
            state: Arc::new(Mutex::new(ChatState::new(config.history_limit))),
            ui_tx,
            dispatcher: None,
        })
    }

    pub fn session(&self) -> &HubSession {
        &self.session
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Log in as `user_id`: connect to the hub, then load channels and users.
    ///
    /// A failed connection is reported to the front end and reflected in the
    /// returned state; the REST data is loaded either way. Starting again
    /// after the session ended rejoins the selected channel on the new
    /// connection.
    pub async fn start(&mut self, user_id: UserId) -> Result<ConnectionState> {
        let current = lock_state(&self.state)?.user_id.clone();
        if current.as_ref().is_some_and(|u| *u != user_id) {
            self.stop().await;
        }
        lock_state(&self.state)?.user_id = Some(user_id.clone());

        if self.dispatcher.is_none() {
            let events = self.session.subscribe();
            let dispatcher = Dispatcher::new(self.state.clone(), self.session.clone(), self.ui_tx.clone());
            self.dispatcher = Some(tokio::spawn(dispatcher.run(events)));
        }

        let was_connected = self.session.is_connected();
        match self.session.start(&user_id).await {
            Ok(()) if !was_connected => {
                let selected = lock_state(&self.state)?.channels.selected().cloned();
                if let Some(channel_id) = selected {
                    rejoin_channel(&self.session, &self.ui_tx, &channel_id).await;
                }
            }
            Ok(()) => {}
            Err(e) => {
                emit_event(&self.ui_tx, UiEvent::error(format!("Chat connection failed: {e}")));
            }
        }

        // Errors are already surfaced as notifications.
        let _ = self.refresh_channels().await;
        let _ = self.load_users().await;

        let state = self.session.state();
        info!(user = %user_id, state = %state, "Chat context started");
        Ok(state)
    }

    /// Make `channel_id` the active channel: reset its unread count, join its
    /// hub group and load its history.
    pub async fn select_channel(&self, channel_id: &ChannelId) -> Result<()> {
        {
            let mut guard = lock_state(&self.state)?;
            guard.channels.set_selected_channel(channel_id)?;
            guard.channels.mark_read(channel_id)?;
        }
        emit_event(
            &self.ui_tx,
            UiEvent::UnreadChanged {
                channel_id: channel_id.clone(),
                unread_count: 0,
            },
        );

        if self.session.is_connected() {
            if let Err(e) = self.session.join_channel(channel_id).await {
                warn!(channel = %channel_id, error = %e, "Failed to join channel");
                emit_event(&self.ui_tx, UiEvent::error(format!("Could not join channel: {e}")));
            }
        } else {
            debug!(channel = %channel_id, "Not connected, join skipped");
        }

        self.load_history(channel_id).await;
        Ok(())
    }

    async fn load_history(&self, channel_id: &ChannelId) {
        match self.api.fetch_messages(channel_id).await {
            Ok(history) => {
                let count = history.len();
                let messages = history.into_iter().map(Message::from_wire).collect();
                match lock_state(&self.state) {
                    Ok(mut guard) => guard.messages.replace_channel(channel_id, messages),
                    Err(e) => {
                        error!(error = %e, "Cannot store channel history");
                        return;
                    }
                }
                debug!(channel = %channel_id, count, "Channel history loaded");
                emit_event(
                    &self.ui_tx,
                    UiEvent::ScrollToBottom {
                        channel_id: channel_id.clone(),
                    },
                );
            }
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Failed to load channel history");
                emit_event(&self.ui_tx, UiEvent::error(format!("Could not load messages: {e}")));
            }
        }
    }

    /// Send to the selected channel.
    ///
    /// Rejected without touching the store when the hub is not connected.
    /// Otherwise a pending entry is recorded first and flagged failed if the
    /// invocation fails. Returns the pending entry's correlation id.
    pub async fn send_message(
        &self,
        content: &str,
        message_type: &str,
        file_url: Option<&str>,
    ) -> Result<Uuid> {
        let (user_id, channel_id) = {
            let guard = lock_state(&self.state)?;
            let user_id = guard.user_id.clone().ok_or(ClientError::NotLoggedIn)?;
            let channel_id = guard
                .channels
                .selected()
                .cloned()
                .ok_or(ClientError::NoChannelSelected)?;
            (user_id, channel_id)
        };

        let state = self.session.state();
        if !state.is_connected() {
            error!(channel = %channel_id, state = %state, "Cannot send message: connection is not established");
            emit_event(&self.ui_tx, UiEvent::error("Connection is not established"));
            return Err(NetError::NotConnected.into());
        }

        let pending = Message::pending(
            channel_id.clone(),
            user_id.clone(),
            content,
            message_type,
            file_url.map(str::to_string),
        );
        let local_id = lock_state(&self.state)?.messages.add_pending(pending.clone());
        emit_event(&self.ui_tx, UiEvent::MessageReceived { message: pending });

        match self
            .session
            .send_to_channel(&channel_id, &user_id, content, message_type, file_url)
            .await
        {
            Ok(()) => Ok(local_id),
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Message send failed");
                lock_state(&self.state)?.messages.mark_failed(local_id)?;
                emit_event(&self.ui_tx, UiEvent::error(format!("Message not sent: {e}")));
                Err(e.into())
            }
        }
    }

    /// Shorthand for a plain text message.
    pub async fn send_text(&self, content: &str) -> Result<Uuid> {
        self.send_message(content, MESSAGE_TYPE_TEXT, None).await
    }

    pub async fn create_channel(&self, name: &str, member_ids: &[UserId]) -> Result<Channel> {
        let user_id = self.current_user()?;

        match self.api.create_channel(name, &user_id, member_ids).await {
            Ok(channel) => {
                lock_state(&self.state)?.channels.upsert(channel.clone());
                info!(channel = %channel.id, name = %channel.name, "Channel created");
                emit_event(&self.ui_tx, UiEvent::info(format!("Channel {} created", channel.name)));
                Ok(channel)
            }
            Err(e) => {
                warn!(error = %e, "Channel creation failed");
                emit_event(&self.ui_tx, UiEvent::error(format!("Could not create channel: {e}")));
                Err(e.into())
            }
        }
    }

    pub async fn refresh_channels(&self) -> Result<Vec<Channel>> {
        let user_id = self.current_user()?;

        match self.api.fetch_channels(&user_id).await {
            Ok(channels) => {
                debug!(count = channels.len(), "Channels loaded");
                lock_state(&self.state)?.channels.set_channels(channels.clone());
                Ok(channels)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load channels");
                emit_event(&self.ui_tx, UiEvent::error(format!("Could not load channels: {e}")));
                Err(e.into())
            }
        }
    }

    pub async fn load_users(&self) -> Result<Vec<ChatUser>> {
        match self.api.fetch_users().await {
            Ok(users) => {
                debug!(count = users.len(), "Users loaded");
                lock_state(&self.state)?.users = users.clone();
                Ok(users)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load users");
                emit_event(&self.ui_tx, UiEvent::error(format!("Could not load users: {e}")));
                Err(e.into())
            }
        }
    }

    /// A channel's messages in display order.
    pub fn channel_messages(&self, channel_id: &ChannelId) -> Result<Vec<Message>> {
        Ok(lock_state(&self.state)?.messages.channel_messages(channel_id))
    }

    pub fn channels(&self) -> Result<Vec<Channel>> {
        Ok(lock_state(&self.state)?.channels.channels().to_vec())
    }

    pub fn selected_channel(&self) -> Result<Option<ChannelId>> {
        Ok(lock_state(&self.state)?.channels.selected().cloned())
    }

    pub fn users(&self) -> Result<Vec<ChatUser>> {
        Ok(lock_state(&self.state)?.users.clone())
    }

    /// Log out: close the hub connection, end the dispatcher and forget all
    /// chat state. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.session.stop().await;

        if let Some(task) = self.dispatcher.take() {
            task.abort();
            emit_event(
                &self.ui_tx,
                UiEvent::ConnectionChanged {
                    state: ConnectionState::Disconnected,
                },
            );
        }

        match lock_state(&self.state) {
            Ok(mut guard) => guard.clear(),
            Err(e) => error!(error = %e, "Cannot clear chat state"),
        }
        info!("Chat context stopped");
    }

    fn current_user(&self) -> Result<UserId> {
        lock_state(&self.state)?
            .user_id
            .clone()
            .ok_or(ClientError::NotLoggedIn)
    }
}
