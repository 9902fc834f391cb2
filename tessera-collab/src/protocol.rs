//! JSON wire protocol between a room and the server.
//!
//! Every message is an object with a `type` tag. The client always sends a
//! JSON array of messages per frame; the server may send an array or a
//! single object. Heartbeats are the bare text frames `"ping"` / `"pong"`.
//!
//! ```text
//! client → [{"type":"UpdatePresence","data":{"x":1}},{"type":"UpdateStorage","ops":[…]}]
//! server ← {"type":"UserJoined","actor":2,"id":"bob","info":null}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::{Op, SnapshotItem};

use crate::config::Presence;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Messages this client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Presence patch, or the full presence when `target_actor` is set.
    UpdatePresence {
        data: Presence,
        #[serde(rename = "targetActor", default, skip_serializing_if = "Option::is_none")]
        target_actor: Option<u64>,
    },
    ClientEvent {
        event: Value,
    },
    UpdateStorage {
        ops: Vec<Op>,
    },
    FetchStorage,
}

/// Another participant as listed in `RoomState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub info: Option<Value>,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    UpdatePresence {
        actor: u64,
        data: Presence,
        #[serde(rename = "targetActor", default, skip_serializing_if = "Option::is_none")]
        target_actor: Option<u64>,
    },
    UserJoined {
        actor: u64,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        info: Option<Value>,
    },
    UserLeft {
        actor: u64,
    },
    Event {
        actor: u64,
        event: Value,
    },
    /// Everyone currently connected, keyed by actor number.
    RoomState {
        users: IndexMap<String, RoomUser>,
    },
    InitialStorageState {
        items: Vec<SnapshotItem>,
    },
    UpdateStorage {
        ops: Vec<Op>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Frame {
    Many(Vec<ServerMessage>),
    One(ServerMessage),
}

/// Parses one inbound text frame into its messages.
pub fn decode_frame(text: &str) -> Result<Vec<ServerMessage>, serde_json::Error> {
    Ok(match serde_json::from_str(text)? {
        Frame::Many(messages) => messages,
        Frame::One(message) => vec![message],
    })
}

/// Encodes one outbound frame.
pub fn encode_frame(messages: &[ClientMessage]) -> Result<String, serde_json::Error> {
    serde_json::to_string(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::NodeId;

    #[test]
    fn test_presence_wire_format() {
        let mut data = Presence::new();
        data.insert("cursor".into(), json!({"x": 1}));
        let frame = encode_frame(&[
            ClientMessage::UpdatePresence {
                data: data.clone(),
                target_actor: None,
            },
            ClientMessage::UpdatePresence {
                data,
                target_actor: Some(4),
            },
            ClientMessage::FetchStorage,
        ])
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "UpdatePresence", "data": {"cursor": {"x": 1}}},
                {"type": "UpdatePresence", "data": {"cursor": {"x": 1}}, "targetActor": 4},
                {"type": "FetchStorage"}
            ])
        );
    }

    #[test]
    fn test_decode_single_and_array() {
        let one = decode_frame(r#"{"type":"UserLeft","actor":2}"#).unwrap();
        assert_eq!(one, vec![ServerMessage::UserLeft { actor: 2 }]);

        let many = decode_frame(
            r#"[{"type":"UserJoined","actor":3},{"type":"Event","actor":3,"event":"wave"}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(
            many[0],
            ServerMessage::UserJoined {
                actor: 3,
                id: None,
                info: None
            }
        );
    }

    #[test]
    fn test_decode_room_state() {
        let messages = decode_frame(
            r#"{"type":"RoomState","users":{"1":{"id":"a"},"7":{"info":{"name":"g"}}}}"#,
        )
        .unwrap();
        match &messages[0] {
            ServerMessage::RoomState { users } => {
                assert_eq!(users.len(), 2);
                assert_eq!(users["1"].id.as_deref(), Some("a"));
                assert_eq!(users["7"].info, Some(json!({"name": "g"})));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_initial_storage() {
        let messages = decode_frame(
            r#"{"type":"InitialStorageState","items":[["root",{"type":"Object","data":{"a":1}}]]}"#,
        )
        .unwrap();
        match &messages[0] {
            ServerMessage::InitialStorageState { items } => {
                assert_eq!(items[0].0, NodeId::root());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode_frame(r#"{"type":"Teleport","actor":1}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }
}
