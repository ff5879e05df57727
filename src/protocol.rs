//! Wire protocol.
//!
//! The relay speaks JSON-over-WebSocket using a Phoenix-channel-style
//! envelope: `{topic, event, payload, ref}`. The inner `payload` for the
//! signaling events carries the `{id, type, data}` message shape from the
//! spec. All payloads other than lobby names and SDP/ICE blobs are opaque
//! to the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The opcode space, `0..=7`. Matches the `type` field of [`WireMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Join = 0,
    Id = 1,
    PeerConnect = 2,
    PeerDisconnect = 3,
    Offer = 4,
    Answer = 5,
    Candidate = 6,
    Seal = 7,
}

/// The `{id, type, data}` message carried inside envelope payloads.
///
/// `id` is `0` for "no peer"; on relay frames it is rewritten by the server
/// to the sender's `user_id` before delivery (never trusted from the client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: u8,
    pub data: String,
}

impl WireMessage {
    pub fn new(id: u32, opcode: Opcode, data: impl Into<String>) -> Self {
        Self {
            id,
            kind: opcode as u8,
            data: data.into(),
        }
    }
}

/// An inbound envelope, parsed in two stages: the outer shape first, then
/// `payload` is re-parsed against an event-specific struct so that unknown
/// or missing fields fail with `bad_request` rather than silently defaulting.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<i64>,
}

/// An outbound envelope: either a correlated `phx_reply` or an uncorrelated
/// server push (`id`, `peer_connect`, `peer_disconnect`, `offer`, `answer`,
/// `candidate`, `sealed`).
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<i64>,
}

impl OutboundEnvelope {
    pub fn push(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: None,
        }
    }

    pub fn reply_ok(topic: impl Into<String>, msg_ref: Option<i64>, response: Value) -> Self {
        Self {
            topic: topic.into(),
            event: "phx_reply".to_string(),
            payload: serde_json::json!({ "status": "ok", "response": response }),
            msg_ref,
        }
    }

    pub fn reply_error(topic: impl Into<String>, msg_ref: Option<i64>, reason: &str) -> Self {
        Self {
            topic: topic.into(),
            event: "phx_reply".to_string(),
            payload: serde_json::json!({
                "status": "error",
                "response": { "reason": reason },
            }),
            msg_ref,
        }
    }
}

/// Payload of the `phx_join` event — the business-level JOIN operation.
/// `data` is the requested lobby name; an empty string asks the server to
/// generate one.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinPayload {
    pub data: String,
}

/// Payload of `offer` / `answer` / `candidate` — a unicast relay request.
/// `id` is the intended destination peer.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayPayload {
    pub id: u32,
    pub data: String,
}

/// Payload of `seal` — empty object, no fields.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SealPayload {}

/// Returns the lobby topic string for a resolved lobby name.
pub fn topic_for(name: &str) -> String {
    format!("lobby:{name}")
}

/// Given `"lobby:<name>"`, returns `<name>`. Used to validate that inbound
/// frames reference the topic the connection actually joined.
pub fn name_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix("lobby:")
}
