//! SignalR JSON hub protocol.
//!
//! Every record is a JSON object terminated by [`RECORD_SEPARATOR`]. A single
//! websocket text frame may carry several records, and a record may in
//! principle be split across frames, so inbound text goes through a
//! [`FrameDecoder`] before being parsed into a [`HubMessage`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{HUB_PROTOCOL, HUB_PROTOCOL_VERSION, MESSAGE_TYPE_TEXT, RECORD_SEPARATOR};
use crate::error::ProtocolError;
use crate::types::{ChannelId, MessageId, UserId};

const TYPE_INVOCATION: u64 = 1;
const TYPE_STREAM_ITEM: u64 = 2;
const TYPE_COMPLETION: u64 = 3;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First record sent by the client after the websocket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    pub fn json() -> Self {
        Self {
            protocol: HUB_PROTOCOL.to_string(),
            version: HUB_PROTOCOL_VERSION,
        }
    }

    pub fn to_record(&self) -> Result<String, ProtocolError> {
        let mut record = serde_json::to_string(self)?;
        record.push(RECORD_SEPARATOR);
        Ok(record)
    }
}

/// The hub's answer to the handshake; an empty object means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(record)?)
    }

    pub fn into_result(self) -> Result<(), ProtocolError> {
        match self.error {
            Some(error) => Err(ProtocolError::HandshakeRejected(error)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Hub messages
// ---------------------------------------------------------------------------

/// A method call in either direction. Without an invocation id the caller
/// expects no completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItem {
    pub invocation_id: String,
    #[serde(default)]
    pub item: Value,
}

/// Result of an invocation that carried an invocation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sent by the hub before it closes the connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub allow_reconnect: bool,
}

/// The subset of hub protocol messages a chat client exchanges.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    StreamItem(StreamItem),
    Completion(Completion),
    Ping,
    Close(CloseMessage),
}

impl HubMessage {
    /// Build an invocation record for `target`.
    pub fn invocation(invocation_id: Option<String>, target: &str, arguments: Vec<Value>) -> Self {
        Self::Invocation(Invocation {
            invocation_id,
            target: target.to_string(),
            arguments,
        })
    }

    /// Parse one record (without its trailing separator).
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(record)?;
        let kind = value
            .as_object()
            .ok_or(ProtocolError::NotAnObject)?
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingType)?;

        match kind {
            TYPE_INVOCATION => Ok(Self::Invocation(serde_json::from_value(value)?)),
            TYPE_STREAM_ITEM => Ok(Self::StreamItem(serde_json::from_value(value)?)),
            TYPE_COMPLETION => Ok(Self::Completion(serde_json::from_value(value)?)),
            TYPE_PING => Ok(Self::Ping),
            TYPE_CLOSE => Ok(Self::Close(serde_json::from_value(value)?)),
            other => Err(ProtocolError::UnsupportedType(other)),
        }
    }

    /// Serialize to a separator-terminated record.
    pub fn to_record(&self) -> Result<String, ProtocolError> {
        let (kind, mut body) = match self {
            Self::Invocation(m) => (TYPE_INVOCATION, serde_json::to_value(m)?),
            Self::StreamItem(m) => (TYPE_STREAM_ITEM, serde_json::to_value(m)?),
            Self::Completion(m) => (TYPE_COMPLETION, serde_json::to_value(m)?),
            Self::Ping => (TYPE_PING, Value::Object(Map::new())),
            Self::Close(m) => (TYPE_CLOSE, serde_json::to_value(m)?),
        };

        match body {
            Value::Object(ref mut map) => {
                map.insert("type".to_string(), Value::from(kind));
            }
            _ => return Err(ProtocolError::NotAnObject),
        }

        let mut record = serde_json::to_string(&body)?;
        record.push(RECORD_SEPARATOR);
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Accumulates inbound text and yields complete records.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Pop the next complete record, if one is buffered.
    pub fn next_record(&mut self) -> Option<String> {
        let end = self.buffer.find(RECORD_SEPARATOR)?;
        let record = self.buffer[..end].to_string();
        self.buffer.drain(..end + RECORD_SEPARATOR.len_utf8());
        Some(record)
    }

    /// True when an unterminated record is waiting for more text.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Chat payloads
// ---------------------------------------------------------------------------

/// Message shape pushed by `receiveChannelMessage` and returned by the
/// history endpoint. `id` and `timestamp` are absent until the server
/// assigns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub channel_id: ChannelId,
    #[serde(alias = "senderId")]
    pub sender: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

fn default_message_type() -> String {
    MESSAGE_TYPE_TEXT.to_string()
}

/// Positional arguments of `SendMessageToChannel`.
pub fn send_message_arguments(
    channel_id: &ChannelId,
    sender_id: &UserId,
    content: &str,
    message_type: &str,
    file_url: Option<&str>,
) -> Vec<Value> {
    vec![
        Value::from(channel_id.as_str()),
        Value::from(sender_id.as_str()),
        Value::from(content),
        Value::from(message_type),
        file_url.map(Value::from).unwrap_or(Value::Null),
    ]
}

/// Parse a hub timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|_| rfc_err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_request_is_terminated() {
        let record = HandshakeRequest::json().to_record().unwrap();
        assert_eq!(record, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn handshake_error_is_surfaced() {
        let ok = HandshakeResponse::parse("{}").unwrap();
        assert!(ok.into_result().is_ok());

        let rejected = HandshakeResponse::parse(r#"{"error":"Requested protocol 'json' is not available."}"#)
            .unwrap();
        assert!(matches!(
            rejected.into_result(),
            Err(ProtocolError::HandshakeRejected(_))
        ));
    }

    #[test]
    fn invocation_record_carries_type_and_arguments() {
        let args = send_message_arguments(
            &ChannelId::from("c1"),
            &UserId::from("1"),
            "hi",
            "text",
            None,
        );
        let msg = HubMessage::invocation(Some("0".into()), "SendMessageToChannel", args);
        let record = msg.to_record().unwrap();
        assert!(record.ends_with(RECORD_SEPARATOR));

        let value: Value = serde_json::from_str(record.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["invocationId"], "0");
        assert_eq!(value["target"], "SendMessageToChannel");
        assert_eq!(value["arguments"], json!(["c1", "1", "hi", "text", null]));
    }

    #[test]
    fn parses_server_messages() {
        let push = HubMessage::parse(
            r#"{"type":1,"target":"receiveChannelMessage","arguments":[{"id":"m1","channelId":"c1","sender":"1","content":"hi","messageType":"text","timestamp":"2024-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        let HubMessage::Invocation(inv) = push else {
            panic!("expected invocation");
        };
        assert_eq!(inv.invocation_id, None);
        let chat: ChatMessage = serde_json::from_value(inv.arguments[0].clone()).unwrap();
        assert_eq!(chat.id, Some(MessageId::from("m1")));
        assert_eq!(chat.file_url, None);

        let completion = HubMessage::parse(r#"{"type":3,"invocationId":"4","error":"boom"}"#).unwrap();
        assert_eq!(
            completion,
            HubMessage::Completion(Completion {
                invocation_id: "4".into(),
                result: None,
                error: Some("boom".into()),
            })
        );

        assert_eq!(HubMessage::parse(r#"{"type":6}"#).unwrap(), HubMessage::Ping);

        let close = HubMessage::parse(r#"{"type":7,"error":"shutdown","allowReconnect":true}"#).unwrap();
        let HubMessage::Close(close) = close else {
            panic!("expected close");
        };
        assert!(close.allow_reconnect);
    }

    #[test]
    fn rejects_unknown_and_malformed_records() {
        assert!(matches!(
            HubMessage::parse(r#"{"type":4,"target":"x"}"#),
            Err(ProtocolError::UnsupportedType(4))
        ));
        assert!(matches!(HubMessage::parse("[]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(HubMessage::parse("{}"), Err(ProtocolError::MissingType)));
        assert!(matches!(HubMessage::parse("{"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn decoder_splits_and_joins_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.push("{}\u{1e}{\"type\":6}\u{1e}{\"type\"");
        assert_eq!(decoder.next_record().as_deref(), Some("{}"));
        assert_eq!(decoder.next_record().as_deref(), Some("{\"type\":6}"));
        assert_eq!(decoder.next_record(), None);
        assert!(decoder.has_partial());

        decoder.push(":6}\u{1e}");
        assert_eq!(decoder.next_record().as_deref(), Some("{\"type\":6}"));
        assert!(!decoder.has_partial());
    }

    #[test]
    fn chat_message_accepts_numeric_ids_and_sender_alias() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "id": 17,
            "channelId": 3,
            "senderId": 1,
            "content": "hello"
        }))
        .unwrap();
        assert_eq!(msg.id, Some(MessageId::from("17")));
        assert_eq!(msg.channel_id, ChannelId::from("3"));
        assert_eq!(msg.sender, UserId::from("1"));
        assert_eq!(msg.message_type, "text");
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        let zulu = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let naive = parse_timestamp("2024-01-01T00:00:00.000").unwrap();
        assert_eq!(zulu, naive);

        let shifted = parse_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(shifted, zulu);

        assert!(parse_timestamp("yesterday").is_err());
    }
}
