//! ICE server configuration for RTCPeerConnection
//!
//! Builds the `iceServers` list handed to the WebRTC stack: the relay
//! credentials issued at join time, with a public STUN server as the
//! fallback for peers that can connect directly.

use serde::{Deserialize, Serialize};

use huddle_core::TurnCredential;

/// Public STUN server used when no TURN credential is held
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// One entry of an RTCConfiguration `iceServers` list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A credential-less STUN entry
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// RTCPeerConnection configuration, shaped for direct JSON handoff
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
}

impl RtcConfig {
    /// Build a configuration from the currently held TURN credential,
    /// if any. The relay entry comes first so constrained networks
    /// reach a working candidate sooner.
    pub fn new(turn: Option<&TurnCredential>) -> Self {
        let mut ice_servers = Vec::with_capacity(2);
        if let Some(turn) = turn {
            ice_servers.push(IceServer {
                urls: turn.urls.clone(),
                username: Some(turn.username.clone()),
                credential: Some(turn.credential.clone()),
            });
        }
        ice_servers.push(IceServer::stun(DEFAULT_STUN_URL));
        Self { ice_servers }
    }
}
