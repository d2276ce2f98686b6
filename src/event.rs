//! Gateway opcodes, the generic payload envelope, and the events this crate
//! emits to callers.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::collections::HashSet;

/// Discord Gateway operation codes.
///
/// See: <https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-opcodes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched. Receive only.
    Dispatch = 0,
    /// Keep the connection alive. Send and receive.
    Heartbeat = 1,
    /// Start a new session. Send only.
    Identify = 2,
    /// Update the client's presence. Send only.
    PresenceUpdate = 3,
    /// Join, leave, or move between voice channels. Send only.
    VoiceStateUpdate = 4,
    /// Resume a previous session. Send only.
    Resume = 6,
    /// The server is asking the client to reconnect. Receive only.
    Reconnect = 7,
    /// Request a chunk of guild members. Send only.
    RequestGuildMembers = 8,
    /// The session has been invalidated. Receive only.
    InvalidSession = 9,
    /// Sent immediately after connecting; carries the heartbeat interval.
    /// Receive only.
    Hello = 10,
    /// Acknowledges a heartbeat. Receive only.
    HeartbeatAck = 11,
}

/// The generic envelope every gateway payload, inbound or outbound, is
/// wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload<T = serde_json::Value> {
    /// The opcode identifying this payload's shape.
    pub op: u8,
    /// The event name, present only on Dispatch payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    /// The monotonic sequence number, present only on Dispatch payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// The event body.
    pub d: T,
}

impl<T> Payload<T> {
    /// Build a payload with no `t`/`s` fields, as used for every outbound
    /// control payload (Heartbeat, Identify, Resume, ...).
    pub fn outbound(op: OpCode, d: T) -> Self {
        Self {
            op: op as u8,
            t: None,
            s: None,
            d,
        }
    }
}

/// Events emitted by a single [`Shard`](crate::shard::Shard).
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// The `READY` dispatch was received; the session is established but
    /// guild availability is still settling.
    Ready {
        /// The session id to use for future resumes.
        session_id: String,
        /// Guild ids announced as unavailable in the `READY` payload.
        guilds: HashSet<String>,
    },
    /// Every awaited guild either arrived or the ready-stabilization timer
    /// elapsed.
    FullReady {
        /// Guild ids that were still missing when the timer fired.
        missing_guilds: Option<HashSet<String>>,
    },
    /// The `RESUMED` dispatch was received.
    Resumed,
    /// Opcode 9 (`InvalidSession`) was received with `d = false`.
    InvalidSession,
    /// The shard was destroyed via [`Shard::destroy`](crate::shard::Shard::destroy).
    Destroyed,
    /// The WebSocket closed.
    Close {
        /// The close code, if the peer sent one.
        code: Option<u16>,
        /// The close reason, if the peer sent one.
        reason: String,
    },
    /// A non-fatal error occurred (serialization, decompression, or
    /// transport) that didn't itself close the socket.
    Error(String),
    /// A `Dispatch` payload, forwarded opaquely alongside the specific
    /// events above so a caller can decode event types this crate doesn't
    /// otherwise model.
    Dispatch {
        /// The event name, e.g. `"MESSAGE_CREATE"`.
        event_type: Option<String>,
        /// The undecoded event body.
        payload: serde_json::Value,
    },
}

/// Events emitted by the [`Cluster`](crate::cluster::Cluster).
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// Every configured shard has reached full-ready at least once. Emitted
    /// exactly once per cluster lifetime.
    Ready,
    /// One shard reached full-ready.
    ShardReady {
        /// The shard's id.
        shard_id: u64,
        /// Guild ids still missing when the shard settled, if any.
        guilds: Option<HashSet<String>>,
    },
    /// One shard reported an unrecoverable error and will not be
    /// reconnected.
    ShardError {
        /// The shard's id.
        shard_id: u64,
        /// A human-readable description of the error.
        message: String,
    },
    /// A shard is about to attempt a reconnect.
    ShardReconnecting {
        /// The shard's id.
        shard_id: u64,
    },
    /// A shard's socket closed and it has been queued for reconnect.
    ShardDisconnected {
        /// The shard's id.
        shard_id: u64,
    },
    /// A raw dispatch payload, forwarded opaquely for the caller to decode.
    Raw {
        /// The shard that received this payload.
        shard_id: u64,
        /// The event name, e.g. `"MESSAGE_CREATE"`.
        event_type: Option<String>,
        /// The undecoded event body.
        payload: serde_json::Value,
    },
    /// The bootstrap fetch or a shard reported the token itself is invalid
    /// (HTTP 401, or gateway close 4004).
    Invalidated,
    /// A low-level diagnostic message, useful for troubleshooting but not
    /// actionable on its own (socket closes, identify-quota waits, ...).
    Debug(String),
}

#[cfg(test)]
mod tests {
    use super::{OpCode, Payload};

    #[test]
    fn outbound_payload_omits_t_and_s() {
        let payload = Payload::outbound(OpCode::Heartbeat, serde_json::json!(5));
        let encoded = serde_json::to_string(&payload).unwrap();

        assert_eq!(encoded, r#"{"op":1,"d":5}"#);
    }

    #[test]
    fn opcode_round_trips_through_json() {
        let encoded = serde_json::to_string(&OpCode::Hello).unwrap();
        assert_eq!(encoded, "10");

        let decoded: OpCode = serde_json::from_str("11").unwrap();
        assert_eq!(decoded, OpCode::HeartbeatAck);
    }
}
