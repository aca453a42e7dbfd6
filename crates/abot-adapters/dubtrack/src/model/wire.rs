//! Socket frame layout.
//!
//! Every socket text frame starts with a one-character transport code. Data
//! frames carry a JSON object with an integer `action`, and message actions
//! carry a nested, JSON-encoded content payload.
//!
//! | Code | Meaning |
//! |------|---------|
//! | `0`  | connection init |
//! | `2`  | ping |
//! | `3`  | pong |
//! | `4`  | data, followed by JSON |
//!
//! | Action | Meaning |
//! |--------|---------|
//! | `4`    | client id assigned |
//! | `10`   | subscribe (outbound) |
//! | `11`   | subscription acknowledged |
//! | `14`   | presence update |
//! | `15`   | message |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Transport code of the connection init frame.
pub const INIT: char = '0';
/// Transport code of a ping.
pub const PING: char = '2';
/// Transport code of a pong.
pub const PONG: char = '3';
/// Transport code of a data frame.
pub const DATA: char = '4';

/// The keep-alive frame sent by the heartbeat.
pub const PING_FRAME: &str = "2";

const ACTION_CLIENT_ID: i64 = 4;
const ACTION_SUBSCRIBE: i64 = 10;
const ACTION_ACK: i64 = 11;
const ACTION_PRESENCE: i64 = 14;
const ACTION_MESSAGE: i64 = 15;

/// Length of the random request id sent with presence frames.
const REQUEST_ID_LEN: usize = 44;
const REQUEST_ID_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ============================================================================
// Layer 1
// ============================================================================

/// A socket text frame split at its transport code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Connection init; the payload is ignored.
    Init(&'a str),
    /// Ping from the server.
    Ping,
    /// Pong from the server.
    Pong,
    /// JSON payload.
    Data(&'a str),
    /// Any other leading character.
    Unknown(char),
}

impl<'a> Frame<'a> {
    /// Splits `text` at its first character. Returns `None` for empty frames.
    pub fn split(text: &'a str) -> Option<Self> {
        let code = text.chars().next()?;
        let rest = &text[code.len_utf8()..];
        Some(match code {
            INIT => Self::Init(rest),
            PING => Self::Ping,
            PONG => Self::Pong,
            DATA => Self::Data(rest),
            other => Self::Unknown(other),
        })
    }
}

// ============================================================================
// Layer 2
// ============================================================================

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The server assigned identifiers to this connection.
    ClientId {
        client_id: String,
        connection_id: String,
    },
    /// A subscription was acknowledged.
    Ack,
    /// Someone connected or disconnected.
    Presence(PresenceUpdate),
    /// A content message.
    Message(ContentMessage),
    /// Any other action number.
    Other(i64),
}

/// Body of a presence action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresenceUpdate {
    pub presence: Presence,
    #[serde(rename = "reqId")]
    pub req_id: Option<String>,
}

/// A single presence change.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Presence {
    /// `0` connect, `1` disconnect.
    pub action: i64,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(rename = "connectionId")]
    pub connection_id: Option<String>,
}

impl Presence {
    pub const CONNECT: i64 = 0;
    pub const DISCONNECT: i64 = 1;
}

/// Body of a message action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentMessage {
    /// Payload encoding, `json` for everything we understand.
    #[serde(rename = "type")]
    pub encoding: String,
    /// Content kind, e.g. `chat-message`.
    pub name: String,
    /// The payload itself, JSON encoded as a string.
    pub data: String,
}

#[derive(Deserialize)]
struct ClientIdBody {
    #[serde(rename = "clientId")]
    client_id: String,
    #[serde(rename = "connectionId")]
    connection_id: String,
}

#[derive(Deserialize)]
struct MessageBody {
    message: ContentMessage,
}

impl Action {
    /// Parses the JSON object following a data code.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(json).map_err(malformed)?;
        let action = value
            .get("action")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::MalformedFrame("missing integer 'action'".into()))?;

        Ok(match action {
            ACTION_CLIENT_ID => {
                let body: ClientIdBody = serde_json::from_value(value).map_err(malformed)?;
                Self::ClientId {
                    client_id: body.client_id,
                    connection_id: body.connection_id,
                }
            }
            ACTION_ACK => Self::Ack,
            ACTION_PRESENCE => Self::Presence(serde_json::from_value(value).map_err(malformed)?),
            ACTION_MESSAGE => {
                let body: MessageBody = serde_json::from_value(value).map_err(malformed)?;
                Self::Message(body.message)
            }
            other => Self::Other(other),
        })
    }
}

fn malformed(err: serde_json::Error) -> ProtocolError {
    ProtocolError::MalformedFrame(err.to_string())
}

// ============================================================================
// Outbound frames
// ============================================================================

#[derive(Serialize)]
struct Subscribe {
    action: i64,
    channel: String,
}

#[derive(Serialize)]
struct Join<'a> {
    action: i64,
    channel: String,
    presence: JoinPresence,
    #[serde(rename = "reqId")]
    req_id: &'a str,
}

#[derive(Serialize)]
struct JoinPresence {
    action: i64,
    data: serde_json::Map<String, Value>,
}

fn room_channel(room_id: &str) -> String {
    format!("room:{room_id}")
}

fn data_frame<T: Serialize>(payload: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(payload).map_err(malformed)?;
    Ok(format!("{DATA}{json}"))
}

/// Frame subscribing to a room's event channel.
pub fn subscribe_frame(room_id: &str) -> Result<String, ProtocolError> {
    data_frame(&Subscribe {
        action: ACTION_SUBSCRIBE,
        channel: room_channel(room_id),
    })
}

/// Frame announcing our presence in a room.
pub fn presence_frame(room_id: &str, req_id: &str) -> Result<String, ProtocolError> {
    data_frame(&Join {
        action: ACTION_PRESENCE,
        channel: room_channel(room_id),
        presence: JoinPresence {
            action: Presence::CONNECT,
            data: serde_json::Map::new(),
        },
        req_id,
    })
}

/// A fresh request id drawn from `[a-zA-Z0-9]`.
pub fn request_id() -> String {
    std::iter::repeat_with(|| uuid::Uuid::new_v4().into_bytes())
        .flat_map(|bytes| {
            // Bytes 6 and 8 carry the uuid version and variant bits.
            bytes
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != 6 && *i != 8)
                .map(|(_, b)| {
                    let at = usize::from(b) % REQUEST_ID_ALPHABET.len();
                    char::from(REQUEST_ID_ALPHABET[at])
                })
        })
        .take(REQUEST_ID_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_on_first_char() {
        assert_eq!(Frame::split(""), None);
        assert_eq!(Frame::split("0{\"sid\":1}"), Some(Frame::Init("{\"sid\":1}")));
        assert_eq!(Frame::split("2"), Some(Frame::Ping));
        assert_eq!(Frame::split("3probe"), Some(Frame::Pong));
        assert_eq!(Frame::split("4{}"), Some(Frame::Data("{}")));
        assert_eq!(Frame::split("9x"), Some(Frame::Unknown('9')));
        assert_eq!(Frame::split("é"), Some(Frame::Unknown('é')));
    }

    #[test]
    fn parses_client_id() {
        let action =
            Action::parse(r#"{"action":4,"clientId":"c-1","connectionId":"k-1"}"#).unwrap();
        assert_eq!(
            action,
            Action::ClientId {
                client_id: "c-1".into(),
                connection_id: "k-1".into()
            }
        );
    }

    #[test]
    fn parses_presence_and_message() {
        let action = Action::parse(
            r#"{"action":14,"presence":{"action":1,"clientId":"c","connectionId":"k"},"reqId":"r"}"#,
        )
        .unwrap();
        let Action::Presence(update) = action else {
            panic!("expected presence, got {action:?}");
        };
        assert_eq!(update.presence.action, Presence::DISCONNECT);
        assert_eq!(update.req_id.as_deref(), Some("r"));

        let action = Action::parse(
            r#"{"action":15,"message":{"type":"json","name":"chat-skip","data":"{}"}}"#,
        )
        .unwrap();
        assert!(matches!(action, Action::Message(m) if m.name == "chat-skip" && m.data == "{}"));
    }

    #[test]
    fn unknown_and_broken_actions() {
        assert_eq!(Action::parse(r#"{"action":11}"#).unwrap(), Action::Ack);
        assert_eq!(Action::parse(r#"{"action":99}"#).unwrap(), Action::Other(99));
        assert!(Action::parse(r#"{"noaction":true}"#).is_err());
        assert!(Action::parse("not json").is_err());
    }

    #[test]
    fn outbound_frames_keep_field_order() {
        assert_eq!(
            subscribe_frame("r1").unwrap(),
            r#"4{"action":10,"channel":"room:r1"}"#
        );
        assert_eq!(
            presence_frame("r1", "abc").unwrap(),
            r#"4{"action":14,"channel":"room:r1","presence":{"action":0,"data":{}},"reqId":"abc"}"#
        );
    }

    #[test]
    fn request_ids_are_alphanumeric() {
        let id = request_id();
        assert_eq!(id.len(), REQUEST_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, request_id());
    }

    #[test]
    fn request_ids_use_both_letter_cases() {
        let ids: String = (0..8).map(|_| request_id()).collect();
        assert!(ids.chars().any(|c| c.is_ascii_uppercase()));
        assert!(ids.chars().any(|c| c.is_ascii_lowercase()));
        assert!(ids.chars().any(|c| c.is_ascii_digit()));
    }
}
