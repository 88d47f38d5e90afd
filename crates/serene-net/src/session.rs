//! Reconnecting hub session.
//!
//! A [`HubSession`] owns at most one live [`HubConnection`]. The connection is
//! driven by a dedicated tokio task; callers talk to it through a typed
//! command channel and receive inbound traffic as [`HubEvent`]s on their own
//! subscriber channel. Connection state is published on a `watch` channel so
//! any holder of the session can check for `Connected` before acting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use serene_shared::constants::{METHOD_JOIN_CHANNEL, METHOD_SEND_MESSAGE_TO_CHANNEL};
use serene_shared::protocol::{send_message_arguments, Completion};
use serene_shared::{ChannelId, ConnectionState, HubMessage, UserId};

use crate::config::HubConfig;
use crate::error::{NetError, Result};
use crate::negotiate::HubEndpoint;
use crate::transport::HubConnection;

const COMMAND_BUFFER: usize = 64;
const SUBSCRIBER_BUFFER: usize = 256;
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Events / commands
// ---------------------------------------------------------------------------

/// Notifications delivered to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// The hub invoked a client method (e.g. `receiveChannelMessage`).
    Invocation { target: String, arguments: Vec<Value> },
}

/// Commands sent *into* the driver task.
enum DriverCommand {
    Invoke {
        target: String,
        arguments: Vec<Value>,
        reply: oneshot::Sender<Result<Value>>,
    },
    Stop(oneshot::Sender<()>),
}

/// Why the connected loop returned.
enum Exit {
    Stopped(Option<oneshot::Sender<()>>),
    Dropped { reason: String, allow_reconnect: bool },
}

impl Exit {
    fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped {
            reason: reason.into(),
            allow_reconnect: true,
        }
    }
}

enum Reconnect {
    Connected(HubConnection),
    Stopped(Option<oneshot::Sender<()>>),
    Exhausted(usize),
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    config: HubConfig,
    http: reqwest::Client,
    state_tx: watch::Sender<ConnectionState>,
    subscribers: StdMutex<Vec<mpsc::Sender<HubEvent>>>,
    /// Bumped by every `start` and `stop`; an in-flight connect whose
    /// generation is no longer current is abandoned.
    generation: watch::Sender<u64>,
}

impl Shared {
    fn next_generation(&self) -> u64 {
        let mut next = 0;
        self.generation.send_modify(|current| {
            *current = current.wrapping_add(1);
            next = *current;
        });
        next
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Hub connection state changed");
            self.publish(HubEvent::StateChanged(next));
        }
    }

    fn publish(&self, event: HubEvent) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Hub event subscriber is lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

struct ActiveConnection {
    user_id: UserId,
    cmd_tx: mpsc::Sender<DriverCommand>,
    task: JoinHandle<()>,
}

impl ActiveConnection {
    async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(DriverCommand::Stop(ack_tx)).await.is_err() {
            // Driver already finished.
            self.task.abort();
            return;
        }
        if timeout(STOP_TIMEOUT, ack_rx).await.is_err() {
            warn!(user = %self.user_id, "Hub driver did not acknowledge stop, aborting");
            self.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// Handle to the realtime hub connection. Cheap to clone; all clones share
/// the same connection.
#[derive(Clone)]
pub struct HubSession {
    shared: Arc<Shared>,
    active: Arc<Mutex<Option<ActiveConnection>>>,
}

impl HubSession {
    pub fn new(config: HubConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_http_client(config, http))
    }

    pub fn with_http_client(config: HubConfig, http: reqwest::Client) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (generation, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                config,
                http,
                state_tx,
                subscribers: StdMutex::new(Vec::new()),
                generation,
            }),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Register a new subscriber. Every subscriber receives every event;
    /// dropping the receiver unregisters it.
    pub fn subscribe(&self) -> mpsc::Receiver<HubEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        match self.shared.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    /// User the current connection is scoped to.
    pub async fn user_id(&self) -> Option<UserId> {
        self.active.lock().await.as_ref().map(|a| a.user_id.clone())
    }

    /// Open a connection scoped to `user_id`.
    ///
    /// A no-op when already connected (or reconnecting) for the same user; a
    /// connection for another user is stopped first. Failure is logged and
    /// leaves the session `Disconnected`. A concurrent [`stop`](Self::stop)
    /// or newer `start` abandons this attempt with [`NetError::Cancelled`].
    pub async fn start(&self, user_id: &UserId) -> Result<()> {
        let (endpoint, generation) = {
            let mut active = self.active.lock().await;

            if let Some(current) = active.as_ref() {
                let live = !current.task.is_finished() && self.state() != ConnectionState::Disconnected;
                if current.user_id == *user_id && live {
                    debug!(user = %user_id, "Hub session already started");
                    return Ok(());
                }
            }
            if let Some(previous) = active.take() {
                info!(user = %previous.user_id, "Replacing previous hub connection");
                previous.shutdown().await;
            }

            let generation = self.shared.next_generation();
            let endpoint = match HubEndpoint::for_user(&self.shared.config.hub_url, user_id) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    error!(error = %e, "Invalid hub endpoint");
                    self.shared.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            };

            self.shared.set_state(ConnectionState::Connecting);
            (endpoint, generation)
        };

        // The lock is released while connecting so `stop` is never blocked
        // behind a slow hub.
        let mut generations = self.shared.generation.subscribe();
        let superseded = async move {
            while *generations.borrow_and_update() == generation {
                if generations.changed().await.is_err() {
                    break;
                }
            }
        };
        let outcome = tokio::select! {
            result = HubConnection::connect(&self.shared.http, &endpoint, &self.shared.config) => result,
            _ = superseded => Err(NetError::Cancelled),
        };

        let mut active = self.active.lock().await;
        let current = self.shared.is_current(generation);

        match outcome {
            Ok(connection) if current => {
                let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
                self.shared.set_state(ConnectionState::Connected);

                let shared = self.shared.clone();
                let task = tokio::spawn(drive(shared, connection, cmd_rx, endpoint));

                info!(user = %user_id, hub = %self.shared.config.hub_url, "Hub connection established");
                *active = Some(ActiveConnection {
                    user_id: user_id.clone(),
                    cmd_tx,
                    task,
                });
                Ok(())
            }
            Ok(mut connection) => {
                drop(active);
                info!(user = %user_id, "Hub connection attempt superseded, closing");
                connection.close().await;
                Err(NetError::Cancelled)
            }
            Err(NetError::Cancelled) => {
                info!(user = %user_id, "Hub connection attempt cancelled");
                Err(NetError::Cancelled)
            }
            Err(e) => {
                error!(user = %user_id, error = %e, "Failed to establish hub connection");
                if current {
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    /// Tear the connection down, abandoning any connect still in flight.
    /// Safe to call in any state.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.shared.next_generation();

        match active.take() {
            Some(connection) => {
                info!(user = %connection.user_id, "Stopping hub connection");
                connection.shutdown().await;
            }
            None => debug!("Hub session stop requested while not started"),
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Invoke a hub method and wait for its completion.
    ///
    /// Rejected with [`NetError::NotConnected`] unless the connection is in
    /// the `Connected` state; nothing is queued for later delivery.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value> {
        let state = self.state();
        if !state.is_connected() {
            error!(method = target, state = %state, "Cannot invoke hub method: connection is not established");
            return Err(NetError::NotConnected);
        }

        let cmd_tx = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.cmd_tx.clone())
            .ok_or(NetError::NotConnected)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(DriverCommand::Invoke {
                target: target.to_string(),
                arguments,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NetError::NotConnected)?;

        match timeout(self.shared.config.invoke_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetError::ConnectionLost("invocation abandoned".into())),
            Err(_) => {
                warn!(method = target, "Hub invocation timed out");
                Err(NetError::Timeout)
            }
        }
    }

    /// `SendMessageToChannel(channelId, senderId, content, messageType, fileUrl)`.
    pub async fn send_to_channel(
        &self,
        channel_id: &ChannelId,
        sender_id: &UserId,
        content: &str,
        message_type: &str,
        file_url: Option<&str>,
    ) -> Result<()> {
        let arguments = send_message_arguments(channel_id, sender_id, content, message_type, file_url);
        self.invoke(METHOD_SEND_MESSAGE_TO_CHANNEL, arguments).await?;
        debug!(channel = %channel_id, "Message delivered to hub");
        Ok(())
    }

    /// `JoinChannel(channelId)`: subscribe this connection to a channel group.
    pub async fn join_channel(&self, channel_id: &ChannelId) -> Result<()> {
        self.invoke(METHOD_JOIN_CHANNEL, vec![Value::from(channel_id.as_str())])
            .await?;
        info!(channel = %channel_id, "Joined channel");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

async fn drive(
    shared: Arc<Shared>,
    mut connection: HubConnection,
    mut commands: mpsc::Receiver<DriverCommand>,
    endpoint: HubEndpoint,
) {
    loop {
        match run_connection(&shared, &mut connection, &mut commands).await {
            Exit::Stopped(ack) => {
                connection.close().await;
                shared.set_state(ConnectionState::Disconnected);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                info!("Hub connection closed");
                return;
            }
            Exit::Dropped {
                reason,
                allow_reconnect,
            } => {
                warn!(reason = %reason, "Hub transport dropped");

                if !allow_reconnect || !shared.config.reconnect.is_enabled() {
                    shared.set_state(ConnectionState::Disconnected);
                    return;
                }

                shared.set_state(ConnectionState::Reconnecting);
                match reconnect(&shared, &endpoint, &mut commands).await {
                    Reconnect::Connected(next) => {
                        connection = next;
                        shared.set_state(ConnectionState::Connected);
                        info!("Hub connection re-established");
                    }
                    Reconnect::Stopped(ack) => {
                        shared.set_state(ConnectionState::Disconnected);
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        return;
                    }
                    Reconnect::Exhausted(attempts) => {
                        error!(attempts, "Giving up reconnecting to hub");
                        shared.set_state(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        }
    }
}

async fn run_connection(
    shared: &Shared,
    connection: &mut HubConnection,
    commands: &mut mpsc::Receiver<DriverCommand>,
) -> Exit {
    let mut pending: HashMap<String, oneshot::Sender<Result<Value>>> = HashMap::new();
    let mut next_invocation_id: u64 = 0;

    let keep_alive = shared.config.keep_alive_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_inbound = Instant::now();

    let exit = 'conn: loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(DriverCommand::Invoke { target, arguments, reply }) => {
                    let invocation_id = next_invocation_id.to_string();
                    next_invocation_id += 1;

                    let message = HubMessage::invocation(Some(invocation_id.clone()), &target, arguments);
                    match connection.send(&message).await {
                        Ok(()) => {
                            debug!(method = %target, invocation = %invocation_id, "Invocation sent");
                            pending.insert(invocation_id, reply);
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = reply.send(Err(e));
                            break 'conn Exit::dropped(reason);
                        }
                    }
                }
                Some(DriverCommand::Stop(ack)) => break 'conn Exit::Stopped(Some(ack)),
                None => break 'conn Exit::Stopped(None),
            },

            inbound = connection.recv() => match inbound {
                Ok(messages) => {
                    last_inbound = Instant::now();
                    for message in messages {
                        match message {
                            HubMessage::Invocation(invocation) => {
                                debug!(method = %invocation.target, "Hub invoked client method");
                                shared.publish(HubEvent::Invocation {
                                    target: invocation.target,
                                    arguments: invocation.arguments,
                                });
                            }
                            HubMessage::Completion(completion) => complete(&mut pending, completion),
                            HubMessage::Ping => {}
                            HubMessage::StreamItem(item) => {
                                debug!(invocation = %item.invocation_id, "Ignoring stream item");
                            }
                            HubMessage::Close(close) => {
                                break 'conn Exit::Dropped {
                                    reason: close
                                        .error
                                        .unwrap_or_else(|| "hub closed the connection".into()),
                                    allow_reconnect: close.allow_reconnect,
                                };
                            }
                        }
                    }
                }
                Err(e) => break 'conn Exit::dropped(e.to_string()),
            },

            _ = ticker.tick() => {
                if last_inbound.elapsed() >= shared.config.server_timeout {
                    break 'conn Exit::dropped("no message from hub within the server timeout");
                }
                if let Err(e) = connection.send(&HubMessage::Ping).await {
                    break 'conn Exit::dropped(e.to_string());
                }
            }
        }
    };

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(NetError::ConnectionLost(
            "connection closed before completion".into(),
        )));
    }

    exit
}

fn complete(pending: &mut HashMap<String, oneshot::Sender<Result<Value>>>, completion: Completion) {
    let Some(reply) = pending.remove(&completion.invocation_id) else {
        debug!(invocation = %completion.invocation_id, "Completion for unknown invocation");
        return;
    };

    let outcome = match completion.error {
        Some(error) => Err(NetError::InvocationFailed(error)),
        None => Ok(completion.result.unwrap_or(Value::Null)),
    };
    let _ = reply.send(outcome);
}

/// Walk the reconnect schedule. Invocations arriving meanwhile are rejected.
async fn reconnect(
    shared: &Shared,
    endpoint: &HubEndpoint,
    commands: &mut mpsc::Receiver<DriverCommand>,
) -> Reconnect {
    let mut attempt = 0;

    while let Some(delay) = shared.config.reconnect.next_delay(attempt) {
        attempt += 1;
        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling hub reconnect");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(DriverCommand::Invoke { target, reply, .. }) => {
                        error!(method = %target, "Cannot invoke hub method: connection is not established");
                        let _ = reply.send(Err(NetError::NotConnected));
                    }
                    Some(DriverCommand::Stop(ack)) => return Reconnect::Stopped(Some(ack)),
                    None => return Reconnect::Stopped(None),
                },
            }
        }

        match HubConnection::connect(&shared.http, endpoint, &shared.config).await {
            Ok(connection) => return Reconnect::Connected(connection),
            Err(e) => warn!(attempt, error = %e, "Hub reconnect attempt failed"),
        }
    }

    Reconnect::Exhausted(attempt)
}
