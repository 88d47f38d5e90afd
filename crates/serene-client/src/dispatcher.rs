//! Routes hub events into the shared chat state.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use serene_net::{HubEvent, HubSession};
use serene_shared::constants::EVENT_RECEIVE_CHANNEL_MESSAGE;
use serene_shared::{ChannelId, ChatMessage, ConnectionState};
use serene_store::{AddOutcome, Message};

use crate::events::{emit_event, UiEvent};
use crate::state::{lock_state, SharedState};

/// Sole consumer of inbound hub traffic for a [`crate::ChatContext`].
pub struct Dispatcher {
    state: SharedState,
    session: HubSession,
    ui_tx: mpsc::Sender<UiEvent>,
    last_state: ConnectionState,
}

impl Dispatcher {
    pub fn new(state: SharedState, session: HubSession, ui_tx: mpsc::Sender<UiEvent>) -> Self {
        Self {
            state,
            session,
            ui_tx,
            last_state: ConnectionState::Disconnected,
        }
    }

    /// Drain `events` until the session drops the subscription.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        info!("Hub event dispatcher started");

        while let Some(event) = events.recv().await {
            self.handle(event);
        }

        warn!("Hub event dispatcher ended");
    }

    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::StateChanged(state) => self.on_state_changed(state),

            HubEvent::Invocation { target, arguments } => {
                if target.eq_ignore_ascii_case(EVENT_RECEIVE_CHANNEL_MESSAGE) {
                    self.on_channel_message(arguments);
                } else {
                    debug!(method = %target, "No handler for hub method");
                }
            }
        }
    }

    fn on_state_changed(&mut self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.last_state, state);
        info!(from = %previous, to = %state, "Chat connection state");
        emit_event(&self.ui_tx, UiEvent::ConnectionChanged { state });

        if previous == ConnectionState::Reconnecting && state == ConnectionState::Connected {
            self.rejoin_selected();
        }
    }

    /// Group membership is per connection, so a new connection has to join
    /// the selected channel again. The join runs on its own task so inbound
    /// traffic keeps flowing while it waits for the hub.
    fn rejoin_selected(&self) {
        let selected = match lock_state(&self.state) {
            Ok(guard) => guard.channels.selected().cloned(),
            Err(e) => {
                error!(error = %e, "Cannot read selected channel");
                return;
            }
        };

        if let Some(channel_id) = selected {
            let session = self.session.clone();
            let ui_tx = self.ui_tx.clone();
            tokio::spawn(async move { rejoin_channel(&session, &ui_tx, &channel_id).await });
        }
    }

    fn on_channel_message(&self, arguments: Vec<Value>) {
        let Some(payload) = arguments.into_iter().next() else {
            warn!("receiveChannelMessage without payload");
            return;
        };

        match serde_json::from_value::<ChatMessage>(payload) {
            Ok(wire) => self.store_message(Message::from_wire(wire)),
            Err(e) => warn!(error = %e, "Malformed channel message"),
        }
    }

    fn store_message(&self, message: Message) {
        let channel_id = message.channel_id.clone();
        let mut events = Vec::new();

        {
            let mut guard = match lock_state(&self.state) {
                Ok(guard) => guard,
                Err(e) => {
                    error!(error = %e, "Dropping channel message");
                    return;
                }
            };

            let own = guard.user_id.as_ref() == Some(&message.sender);
            match guard.messages.add_message(message.clone()) {
                AddOutcome::Duplicate => {
                    debug!(channel = %channel_id, id = ?message.id, "Duplicate delivery absorbed");
                    return;
                }
                AddOutcome::Evicted => {
                    debug!(channel = %channel_id, id = ?message.id, "Message too old for a full history");
                    return;
                }
                AddOutcome::Confirmed(local_id) => {
                    guard.channels.note_incoming(&message, false);
                    events.push(UiEvent::MessageConfirmed {
                        channel_id: channel_id.clone(),
                        local_id,
                    });
                }
                AddOutcome::Added => {
                    let unread = guard.channels.note_incoming(&message, !own);
                    let selected = guard.channels.is_selected(&channel_id);
                    events.push(UiEvent::MessageReceived { message });
                    if selected {
                        events.push(UiEvent::ScrollToBottom {
                            channel_id: channel_id.clone(),
                        });
                    } else if !own {
                        if let Some(unread_count) = unread {
                            events.push(UiEvent::UnreadChanged {
                                channel_id: channel_id.clone(),
                                unread_count,
                            });
                        }
                    }
                }
            }
        }

        for event in events {
            emit_event(&self.ui_tx, event);
        }
    }
}

/// Join `channel_id` on the current connection, reporting failure to the UI.
pub(crate) async fn rejoin_channel(session: &HubSession, ui_tx: &mpsc::Sender<UiEvent>, channel_id: &ChannelId) {
    if let Err(e) = session.join_channel(channel_id).await {
        warn!(channel = %channel_id, error = %e, "Failed to rejoin channel");
        emit_event(
            ui_tx,
            UiEvent::error(format!("Could not rejoin channel {channel_id}: {e}")),
        );
    }
}
