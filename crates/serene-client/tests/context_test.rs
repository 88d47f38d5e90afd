use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use serene_client::{ApiError, ChatContext, ClientConfig, ClientError, UiEvent};
use serene_net::NetError;
use serene_shared::{ChannelId, ConnectionState, EnvelopeError, MessageId, UserId};
use serene_store::Delivery;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// In-process backend: hub plus REST API
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Backend {
    accepting: Arc<AtomicBool>,
    hold_joins: Arc<AtomicBool>,
    history: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    created: Arc<Mutex<Vec<Value>>>,
    invocations: mpsc::UnboundedSender<Value>,
    push: broadcast::Sender<String>,
    kill: broadcast::Sender<()>,
}

struct TestServer {
    addr: SocketAddr,
    backend: Backend,
    invocations: mpsc::UnboundedReceiver<Value>,
}

impl TestServer {
    async fn start() -> Self {
        let (inv_tx, inv_rx) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(64);
        let (kill, _) = broadcast::channel(4);
        let backend = Backend {
            accepting: Arc::new(AtomicBool::new(true)),
            hold_joins: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(HashMap::new())),
            created: Arc::new(Mutex::new(Vec::new())),
            invocations: inv_tx,
            push,
            kill,
        };

        let app = Router::new()
            .route("/chatHub/negotiate", post(negotiate))
            .route("/chatHub", get(hub))
            .route("/api/Chat/channels", get(list_channels).post(create_channel))
            .route("/api/Chat/channels/:id/messages", get(channel_history))
            .route("/api/Chat/users", get(list_users))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            backend,
            invocations: inv_rx,
        }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            hub_url: format!("http://{}/chatHub", self.addr),
            api_url: format!("http://{}", self.addr),
            invoke_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    fn push_message(&self, message: Value) {
        self.push_record(json!({"type": 1, "target": "receiveChannelMessage", "arguments": [message]}));
    }

    fn push_record(&self, record: Value) {
        self.backend.push.send(format!("{record}\u{1e}")).unwrap();
    }

    fn drop_connections(&self) {
        let _ = self.backend.kill.send(());
    }

    async fn next_invocation(&mut self) -> Value {
        timeout(WAIT, self.invocations.recv())
            .await
            .expect("hub did not receive an invocation")
            .expect("hub invocation channel closed")
    }

    async fn assert_no_invocation(&mut self) {
        assert!(timeout(Duration::from_millis(200), self.invocations.recv())
            .await
            .is_err());
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({"success": true, "result": {"data": data, "message": "ok"}}))
}

async fn negotiate(State(backend): State<Backend>) -> Response {
    if !backend.accepting.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "connectionId": "conn",
        "connectionToken": "token",
        "negotiateVersion": 1,
        "availableTransports": [{"transport": "WebSockets", "transferFormats": ["Text"]}]
    }))
    .into_response()
}

async fn list_channels() -> Json<Value> {
    envelope(json!([
        {"id": "c1", "name": "general", "unreadCount": 0},
        {"id": "c2", "name": "random"}
    ]))
}

async fn list_users() -> Json<Value> {
    envelope(json!([{"id": 1, "fullName": "One"}, {"id": 2, "fullName": "Two"}]))
}

async fn create_channel(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    backend.created.lock().unwrap().push(body.clone());
    if body["name"] == "taken" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "result": {"message": "Channel name already exists"}})),
        )
            .into_response();
    }
    envelope(json!({"id": "c9", "name": body["name"]})).into_response()
}

async fn channel_history(Path(id): Path<String>, State(backend): State<Backend>) -> Json<Value> {
    let history = backend.history.lock().unwrap().get(&id).cloned().unwrap_or_default();
    envelope(Value::Array(history))
}

async fn hub(ws: WebSocketUpgrade, State(backend): State<Backend>) -> Response {
    ws.on_upgrade(move |socket| hub_socket(socket, backend))
}

async fn hub_socket(mut socket: WebSocket, backend: Backend) {
    match socket.recv().await {
        Some(Ok(WsMessage::Text(text))) if text.contains("\"protocol\":\"json\"") => {}
        _ => return,
    }

    let mut push_rx = backend.push.subscribe();
    let mut kill_rx = backend.kill.subscribe();
    if socket.send(WsMessage::Text("{}\u{1e}".into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                };
                for record in text.split('\u{1e}').filter(|r| !r.is_empty()) {
                    let value: Value = serde_json::from_str(record).unwrap();
                    if value["type"] != 1 {
                        continue;
                    }
                    let _ = backend.invocations.send(value.clone());
                    if value["target"] == "JoinChannel" && backend.hold_joins.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Some(id) = value.get("invocationId").and_then(Value::as_str) {
                        let reply = json!({"type": 3, "invocationId": id, "result": null});
                        if socket.send(WsMessage::Text(format!("{reply}\u{1e}"))).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(record) = push_rx.recv() => {
                if socket.send(WsMessage::Text(record)).await.is_err() {
                    return;
                }
            }
            _ = kill_rx.recv() => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn wait_for(
    ui_rx: &mut mpsc::Receiver<UiEvent>,
    what: &str,
    pred: impl Fn(&UiEvent) -> bool,
) -> UiEvent {
    timeout(WAIT, async {
        loop {
            match ui_rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("ui channel closed while waiting for {what}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

async fn started(server: &TestServer) -> (ChatContext, mpsc::Receiver<UiEvent>) {
    let (ui_tx, ui_rx) = mpsc::channel(256);
    let mut context = ChatContext::new(&server.config(), ui_tx).unwrap();
    context.start(UserId::from("1")).await.unwrap();
    (context, ui_rx)
}

fn message(id: &str, channel: &str, sender: &str, content: &str, minute: u32) -> Value {
    json!({
        "id": id,
        "channelId": channel,
        "sender": sender,
        "content": content,
        "messageType": "text",
        "timestamp": format!("2024-01-01T00:{minute:02}:00Z")
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_then_echo_leaves_exactly_one_message() {
    let mut server = TestServer::start().await;
    let (context, mut ui_rx) = started(&server).await;
    assert_eq!(context.connection_state(), ConnectionState::Connected);

    let c1 = ChannelId::from("c1");
    context.select_channel(&c1).await.unwrap();
    let join = server.next_invocation().await;
    assert_eq!(join["target"], "JoinChannel");
    assert_eq!(join["arguments"], json!(["c1"]));

    let local_id = context.send_text("hi").await.unwrap();
    let send = server.next_invocation().await;
    assert_eq!(send["target"], "SendMessageToChannel");
    assert_eq!(send["arguments"], json!(["c1", "1", "hi", "text", null]));

    let pending = context.channel_messages(&c1).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].delivery, Delivery::Pending);

    server.push_message(message("m1", "c1", "1", "hi", 0));
    let confirmed = wait_for(&mut ui_rx, "confirmation", |e| {
        matches!(e, UiEvent::MessageConfirmed { .. })
    })
    .await;
    assert_eq!(
        confirmed,
        UiEvent::MessageConfirmed {
            channel_id: c1.clone(),
            local_id
        }
    );

    // Redelivery, then a marker so we know the redelivery was processed.
    server.push_message(message("m1", "c1", "1", "hi", 0));
    server.push_message(message("marker", "c2", "2", "x", 1));
    wait_for(&mut ui_rx, "marker", |e| {
        matches!(e, UiEvent::UnreadChanged { channel_id, .. } if channel_id.as_str() == "c2")
    })
    .await;

    let messages = context.channel_messages(&c1).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, Some(MessageId::from("m1")));
    assert_eq!(messages[0].delivery, Delivery::Confirmed);
}

#[tokio::test]
async fn send_while_disconnected_is_rejected() {
    let mut server = TestServer::start().await;
    server.backend.accepting.store(false, Ordering::SeqCst);
    let (context, mut ui_rx) = started(&server).await;

    assert_eq!(context.connection_state(), ConnectionState::Disconnected);
    assert_eq!(context.channels().unwrap().len(), 2, "REST data loads without the hub");

    let c1 = ChannelId::from("c1");
    context.select_channel(&c1).await.unwrap();

    let result = context.send_text("hi").await;
    assert!(matches!(result, Err(ClientError::Net(NetError::NotConnected))));
    assert!(context.channel_messages(&c1).unwrap().is_empty());
    server.assert_no_invocation().await;

    wait_for(&mut ui_rx, "not-connected notification", |e| {
        matches!(e, UiEvent::Notification { message, .. } if message.contains("not established"))
    })
    .await;
}

#[tokio::test]
async fn reconnect_keeps_selection_and_rejoins() {
    let mut server = TestServer::start().await;
    let (context, mut ui_rx) = started(&server).await;

    let c1 = ChannelId::from("c1");
    context.select_channel(&c1).await.unwrap();
    server.next_invocation().await;

    server.push_message(message("m1", "c1", "2", "before", 0));
    wait_for(&mut ui_rx, "first message", |e| {
        matches!(e, UiEvent::MessageReceived { .. })
    })
    .await;

    server.drop_connections();
    wait_for(&mut ui_rx, "reconnecting", |e| {
        *e == UiEvent::ConnectionChanged {
            state: ConnectionState::Reconnecting,
        }
    })
    .await;
    wait_for(&mut ui_rx, "reconnected", |e| {
        *e == UiEvent::ConnectionChanged {
            state: ConnectionState::Connected,
        }
    })
    .await;

    let rejoin = server.next_invocation().await;
    assert_eq!(rejoin["target"], "JoinChannel");
    assert_eq!(rejoin["arguments"], json!(["c1"]));

    assert_eq!(context.selected_channel().unwrap(), Some(c1.clone()));
    let messages = context.channel_messages(&c1).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "before");
}

#[tokio::test]
async fn restart_after_session_end_rejoins_selection() {
    let mut server = TestServer::start().await;
    let (mut context, mut ui_rx) = started(&server).await;

    let c1 = ChannelId::from("c1");
    context.select_channel(&c1).await.unwrap();
    assert_eq!(server.next_invocation().await["target"], "JoinChannel");

    server.push_record(json!({"type": 7, "allowReconnect": false}));
    wait_for(&mut ui_rx, "session end", |e| {
        *e == UiEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
        }
    })
    .await;

    let state = context.start(UserId::from("1")).await.unwrap();
    assert_eq!(state, ConnectionState::Connected);
    assert_eq!(context.selected_channel().unwrap(), Some(c1.clone()));

    let rejoin = server.next_invocation().await;
    assert_eq!(rejoin["target"], "JoinChannel");
    assert_eq!(rejoin["arguments"], json!(["c1"]));

    server.push_message(message("m2", "c1", "2", "after", 2));
    wait_for(&mut ui_rx, "message after restart", |e| {
        matches!(e, UiEvent::MessageReceived { message } if message.content == "after")
    })
    .await;
}

#[tokio::test]
async fn pending_rejoin_does_not_hold_up_inbound_messages() {
    let mut server = TestServer::start().await;
    let (context, mut ui_rx) = started(&server).await;

    let c1 = ChannelId::from("c1");
    context.select_channel(&c1).await.unwrap();
    server.next_invocation().await;

    server.backend.hold_joins.store(true, Ordering::SeqCst);
    server.drop_connections();
    wait_for(&mut ui_rx, "reconnected", |e| {
        *e == UiEvent::ConnectionChanged {
            state: ConnectionState::Connected,
        }
    })
    .await;
    assert_eq!(server.next_invocation().await["target"], "JoinChannel");

    // The join is still unanswered; pushes must be stored regardless.
    server.push_message(message("m1", "c1", "2", "during rejoin", 1));
    timeout(
        Duration::from_millis(1000),
        wait_for(&mut ui_rx, "message during rejoin", |e| {
            matches!(e, UiEvent::MessageReceived { .. })
        }),
    )
    .await
    .expect("message waited behind the rejoin");
    assert_eq!(context.channel_messages(&c1).unwrap().len(), 1);
}

#[tokio::test]
async fn switching_channels_leaves_other_history_alone() {
    let server = TestServer::start().await;
    let (context, mut ui_rx) = started(&server).await;

    server.push_message(message("a1", "c1", "2", "one", 1));
    server.push_message(message("a2", "c1", "2", "two", 2));
    wait_for(&mut ui_rx, "second unread", |e| {
        matches!(e, UiEvent::UnreadChanged { unread_count: 2, .. })
    })
    .await;

    let c2 = ChannelId::from("c2");
    context.select_channel(&c2).await.unwrap();

    let channels = context.channels().unwrap();
    let unread = |id: &str| channels.iter().find(|c| c.id.as_str() == id).unwrap().unread_count;
    assert_eq!(unread("c1"), 2);
    assert_eq!(unread("c2"), 0);
    assert_eq!(context.channel_messages(&"c1".into()).unwrap().len(), 2);
    assert!(context.channel_messages(&c2).unwrap().is_empty());
}

#[tokio::test]
async fn history_is_sorted_and_deduplicated() {
    let server = TestServer::start().await;
    server.backend.history.lock().unwrap().insert(
        "c1".into(),
        vec![
            message("h3", "c1", "2", "third", 3),
            message("h1", "c1", "2", "first", 1),
            message("h2", "c1", "2", "second", 2),
        ],
    );
    let (context, mut ui_rx) = started(&server).await;

    let c1 = ChannelId::from("c1");
    context.select_channel(&c1).await.unwrap();

    server.push_message(message("h1", "c1", "2", "first", 1));
    server.push_message(message("h4", "c1", "2", "fourth", 4));
    wait_for(&mut ui_rx, "new message", |e| {
        matches!(e, UiEvent::MessageReceived { message } if message.content == "fourth")
    })
    .await;

    let contents: Vec<String> = context
        .channel_messages(&c1)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, ["first", "second", "third", "fourth"]);
}

#[tokio::test]
async fn rest_rejection_is_reported_without_touching_connection() {
    let server = TestServer::start().await;
    let (context, mut ui_rx) = started(&server).await;

    let result = context.create_channel("taken", &[]).await;
    match result {
        Err(ClientError::Api(ApiError::Envelope(EnvelopeError::Rejected(message)))) => {
            assert_eq!(message, "Channel name already exists");
        }
        other => panic!("expected envelope rejection, got {other:?}"),
    }
    wait_for(&mut ui_rx, "error notification", |e| {
        matches!(e, UiEvent::Notification { message, .. } if message.contains("already exists"))
    })
    .await;
    assert_eq!(context.connection_state(), ConnectionState::Connected);

    let created = context.create_channel("ops", &[UserId::from("2")]).await.unwrap();
    assert_eq!(created.id, ChannelId::from("c9"));
    assert!(context.channels().unwrap().iter().any(|c| c.name == "ops"));

    let bodies = server.backend.created.lock().unwrap().clone();
    assert_eq!(bodies[1], json!({"name": "ops", "creatorId": "1", "memberIds": ["2"]}));
}

#[tokio::test]
async fn users_are_loaded_on_start() {
    let server = TestServer::start().await;
    let (context, _ui_rx) = started(&server).await;

    let users = context.users().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[1].name, "Two");
}

#[tokio::test]
async fn stop_clears_state_and_is_idempotent() {
    let server = TestServer::start().await;
    let (mut context, _ui_rx) = started(&server).await;
    context.select_channel(&"c1".into()).await.unwrap();

    context.stop().await;
    context.stop().await;

    assert_eq!(context.connection_state(), ConnectionState::Disconnected);
    assert!(context.channels().unwrap().is_empty());
    assert_eq!(context.selected_channel().unwrap(), None);
    assert!(matches!(
        context.send_text("late").await,
        Err(ClientError::NotLoggedIn)
    ));
}
