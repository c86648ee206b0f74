//! Wire protocol.
//!
//! Every message is a JSON text envelope:
//!
//! ```json
//! { "Method": "player_update", "Payload": { "Id": 0, "Position": { "X": 1.0, "Y": 0.5, "Z": 2.0 } } }
//! ```
//!
//! `Request` covers client -> server methods and `Event` covers
//! server -> client methods. Both are adjacently tagged so the envelope is
//! produced directly by serde.
//!
//! Decoding is two-phase: the `Method` tag is checked against the known
//! catalogue first, so an unknown method is reported separately from a
//! known method with a bad payload.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::math::Position;

/// Envelope key carrying the method tag.
pub const METHOD_KEY: &str = "Method";
/// Envelope key carrying the method-specific payload.
pub const PAYLOAD_KEY: &str = "Payload";

/// Id issued by the server for players and items.
pub type Uid = u64;

/// Player score.
pub type Score = u32;

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Method", content = "Payload", rename_all = "snake_case")]
pub enum Request {
    Ping(PingPayload),
    Login(LoginPayload),
    PlayerUpdate(PlayerUpdatePayload),
    GetItem(GetItemPayload),
    Collision(CollisionPayload),
}

impl Request {
    /// Method tags accepted by the server.
    pub const METHODS: &'static [&'static str] =
        &["ping", "login", "player_update", "get_item", "collision"];

    pub fn method(&self) -> &'static str {
        match self {
            Request::Ping(_) => "ping",
            Request::Login(_) => "login",
            Request::PlayerUpdate(_) => "player_update",
            Request::GetItem(_) => "get_item",
            Request::Collision(_) => "collision",
        }
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Method", content = "Payload", rename_all = "snake_case")]
pub enum Event {
    Pong(PongPayload),
    LoginResponse(LoginResponsePayload),
    Sync(SyncPayload),
    DeleteItem(DeleteItemPayload),
    Spawn(SpawnPayload),
    Environment(EnvironmentPayload),
    DeletePlayer(DeletePlayerPayload),
}

impl Event {
    /// Method tags emitted by the server.
    pub const METHODS: &'static [&'static str] = &[
        "pong",
        "login_response",
        "sync",
        "delete_item",
        "spawn",
        "environment",
        "delete_player",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            Event::Pong(_) => "pong",
            Event::LoginResponse(_) => "login_response",
            Event::Sync(_) => "sync",
            Event::DeleteItem(_) => "delete_item",
            Event::Spawn(_) => "spawn",
            Event::Environment(_) => "environment",
            Event::DeletePlayer(_) => "delete_player",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PingPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PongPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponsePayload {
    pub id: Uid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerUpdatePayload {
    pub id: Uid,
    pub position: Position,
}

/// Replicated view of one player inside a `sync` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerState {
    pub id: Uid,
    pub position: Position,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncPayload {
    pub players: Vec<PlayerState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemPayload {
    pub item_id: Uid,
    pub player_id: Uid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemPayload {
    pub item_id: Uid,
}

/// Replicated view of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemState {
    pub id: Uid,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpawnPayload {
    pub item: ItemState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentPayload {
    pub items: Vec<ItemState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CollisionPayload {
    pub alpha_id: Uid,
    pub bravo_id: Uid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeletePlayerPayload {
    pub id: Uid,
}

/// Decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The text is not a JSON document.
    InvalidJson(String),
    /// The envelope has no string `Method` field.
    MissingMethod,
    /// The method tag is not in the catalogue for this direction.
    UnknownMethod(String),
    /// The method is known but its payload does not match the schema.
    MalformedPayload { method: String, reason: String },
    /// Serialization of an outgoing message failed.
    Encode(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidJson(e) => write!(f, "invalid json: {e}"),
            ProtocolError::MissingMethod => write!(f, "envelope has no {METHOD_KEY} field"),
            ProtocolError::UnknownMethod(m) => write!(f, "unknown method {m:?}"),
            ProtocolError::MalformedPayload { method, reason } => {
                write!(f, "malformed {method} payload: {reason}")
            }
            ProtocolError::Encode(e) => write!(f, "encode failed: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn decode_tagged<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let method = value
        .get(METHOD_KEY)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingMethod)?
        .to_owned();
    if !known.contains(&method.as_str()) {
        return Err(ProtocolError::UnknownMethod(method));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload {
        method,
        reason: e.to_string(),
    })
}

/// Decodes an inbound client message.
pub fn decode_request(text: &str) -> Result<Request, ProtocolError> {
    decode_tagged(text, Request::METHODS)
}

/// Decodes a server message (client side).
pub fn decode_event(text: &str) -> Result<Event, ProtocolError> {
    decode_tagged(text, Event::METHODS)
}

pub fn encode_event(event: &Event) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub fn encode_request(request: &Request) -> Result<String, ProtocolError> {
    serde_json::to_string(request).map_err(|e| ProtocolError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_player_update() {
        let text = r#"{"Method":"player_update","Payload":{"Id":3,"Position":{"X":1.0,"Y":0.5,"Z":2.0}}}"#;
        let req = decode_request(text).unwrap();
        assert_eq!(
            req,
            Request::PlayerUpdate(PlayerUpdatePayload {
                id: 3,
                position: Position::new(1.0, 0.5, 2.0),
            })
        );
        assert_eq!(req.method(), "player_update");
    }

    #[test]
    fn decodes_get_item_and_collision() {
        let get = decode_request(r#"{"Method":"get_item","Payload":{"ItemId":7,"PlayerId":2}}"#)
            .unwrap();
        assert_eq!(
            get,
            Request::GetItem(GetItemPayload {
                item_id: 7,
                player_id: 2
            })
        );

        let hit = decode_request(r#"{"Method":"collision","Payload":{"AlphaId":0,"BravoId":1}}"#)
            .unwrap();
        assert_eq!(
            hit,
            Request::Collision(CollisionPayload {
                alpha_id: 0,
                bravo_id: 1
            })
        );
    }

    #[test]
    fn ids_above_u32_range_survive_the_wire() {
        let id = u64::from(u32::MAX) + 7;
        let text = encode_event(&Event::LoginResponse(LoginResponsePayload { id })).unwrap();
        assert_eq!(text, r#"{"Method":"login_response","Payload":{"Id":4294967302}}"#);
        assert_eq!(
            decode_event(&text).unwrap(),
            Event::LoginResponse(LoginResponsePayload { id })
        );
    }

    #[test]
    fn unknown_method_is_reported_by_name() {
        let err = decode_request(r#"{"Method":"teleport","Payload":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMethod("teleport".into()));
    }

    #[test]
    fn server_methods_are_not_accepted_as_requests() {
        let err = decode_request(r#"{"Method":"sync","Payload":{"Players":[]}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMethod(m) if m == "sync"));
    }

    #[test]
    fn bad_payload_is_malformed_not_unknown() {
        let err = decode_request(r#"{"Method":"login","Payload":{"Nom":"Ann"}}"#).unwrap_err();
        match err {
            ProtocolError::MalformedPayload { method, .. } => assert_eq!(method, "login"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn garbage_and_missing_method() {
        assert!(matches!(
            decode_request("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            decode_request(r#"{"Payload":{}}"#),
            Err(ProtocolError::MissingMethod)
        );
        assert_eq!(
            decode_request(r#"{"Method":5,"Payload":{}}"#),
            Err(ProtocolError::MissingMethod)
        );
    }

    #[test]
    fn encodes_events_in_envelope_shape() {
        let text = encode_event(&Event::DeleteItem(DeleteItemPayload { item_id: 1 })).unwrap();
        assert_eq!(text, r#"{"Method":"delete_item","Payload":{"ItemId":1}}"#);

        let text = encode_event(&Event::Pong(PongPayload {
            message: "pong".into(),
        }))
        .unwrap();
        assert_eq!(text, r#"{"Method":"pong","Payload":{"Message":"pong"}}"#);

        let text = encode_event(&Event::Sync(SyncPayload {
            players: vec![PlayerState {
                id: 0,
                position: Position::new(1.0, 0.5, 2.0),
                score: 0,
            }],
        }))
        .unwrap();
        assert_eq!(
            text,
            r#"{"Method":"sync","Payload":{"Players":[{"Id":0,"Position":{"X":1.0,"Y":0.5,"Z":2.0},"Score":0}]}}"#
        );
    }

    #[test]
    fn client_side_round_trip_for_spawn() {
        let event = Event::Spawn(SpawnPayload {
            item: ItemState {
                id: 1,
                position: Position::new(-3.0, 0.5, 4.0),
            },
        });
        let back = decode_event(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.method(), "spawn");
    }

    #[test]
    fn method_lists_match_variant_tags() {
        for m in Request::METHODS {
            assert!(!Event::METHODS.contains(m), "{m} used in both directions");
        }
        let login = encode_request(&Request::Login(LoginPayload { name: "Ann".into() })).unwrap();
        assert_eq!(login, r#"{"Method":"login","Payload":{"Name":"Ann"}}"#);
    }
}
