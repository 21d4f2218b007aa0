//! Signaling protocol messages
//!
//! JSON messages tagged by an `event` field, kebab-case events with
//! camelCase payload fields. The tag is deliberately not called `type`:
//! signal payloads carry their own `type` field (offer/answer/candidate)
//! that must survive the round trip untouched.

use serde::{Deserialize, Serialize};

/// Messages a client sends to the signaling server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Announce the claimed identity for this connection
    Authenticate {
        user_id: String,
        device_id: Option<String>,
    },

    /// Join a room, creating it on first use
    JoinRoom {
        /// Omitted to create a fresh room with a server-generated id
        room_id: Option<String>,
        user_id: Option<String>,
        device_id: Option<String>,
        #[serde(default)]
        is_private: bool,
        /// Opaque room annotations, stored verbatim
        #[serde(default)]
        metadata: serde_json::Value,
    },

    /// Relay an opaque negotiation payload to another peer
    Signal {
        /// Peer id of the recipient
        target: String,
        /// Opaque SDP/ICE payload, never interpreted
        signal: serde_json::Value,
        /// Payload kind as declared by the sender (offer/answer/candidate)
        #[serde(rename = "type")]
        kind: String,
    },

    /// Leave the current room
    LeaveRoom { room_id: Option<String> },
}

/// Messages the signaling server sends to a client
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges `authenticate`
    Authenticated { success: bool },

    /// Acknowledges `join-room`
    RoomJoined {
        success: bool,
        room_id: String,
        /// The joiner's fresh peer id
        peer_id: String,
        /// Peers already present, excluding the joiner
        existing_peers: Vec<PeerInfo>,
        turn_credentials: huddle_core::TurnCredential,
    },

    /// Acknowledges `leave-room`
    RoomLeft { success: bool },

    /// Pushed to a room when a new peer joins
    PeerJoined {
        peer_id: String,
        user_id: String,
        device_id: String,
    },

    /// Pushed to a room when a peer leaves or disconnects
    PeerLeft { peer_id: String, user_id: String },

    /// A relayed negotiation payload; `peer_id` identifies the sender
    Signal {
        peer_id: String,
        signal: serde_json::Value,
        #[serde(rename = "type")]
        kind: String,
    },

    /// Failure acknowledgement
    Error { code: ErrorCode, message: String },
}

/// A peer as seen by other room members
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: String,
    pub user_id: String,
    pub device_id: String,
}

/// Error codes carried by `ServerMessage::Error`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Message could not be decoded
    InvalidMessage,

    /// `userId` missing or empty
    MissingUserId,

    /// Operation requires a prior `authenticate`
    NotAuthenticated,

    /// Connection already joined a room
    AlreadyInRoom,

    /// Internal server error
    InternalError,
}

impl ClientMessage {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Create an error acknowledgement
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
