//! Huddle client - signaling coordination for WebRTC peers
//!
//! The library half of a call client: it maintains the signaling
//! session (authenticate, join, relay, leave), mirrors the room roster,
//! and turns issued TURN credentials into an RTCPeerConnection
//! configuration. Media itself is out of scope; the WebRTC stack
//! consumes the events and configuration this crate produces.

pub mod client;
pub mod ice;

pub use client::{ClientError, JoinedRoom, PeerClient, PeerEvent};
pub use ice::{IceServer, RtcConfig, DEFAULT_STUN_URL};

// Wire types come from the server crate so both sides stay in lockstep
pub use huddle_signal::messages::{ClientMessage, ErrorCode, PeerInfo, ServerMessage};
