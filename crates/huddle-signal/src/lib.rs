//! Huddle signaling server
//!
//! WebSocket rendezvous point for WebRTC peers. Clients authenticate,
//! join named rooms, learn who else is there, and relay opaque SDP and
//! ICE payloads to each other until their direct connection comes up.
//!
//! # Protocol
//!
//! 1. Client connects and sends `authenticate` with its user id
//! 2. Client sends `join-room`; the reply carries the current roster
//!    and a set of short-lived TURN credentials
//! 3. Everyone already in the room is told a peer joined
//! 4. Peers exchange offers, answers, and ICE candidates through
//!    `signal` messages addressed by peer id
//! 5. Once the media path is up the socket can idle; on disconnect the
//!    room is told the peer left
//!
//! The same port also answers plain HTTP for health checks, TURN
//! credential issuance, and an ops stats snapshot.

pub mod http;
pub mod limiter;
pub mod messages;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod service;

pub use http::HttpContext;
pub use limiter::ConnectionLimiter;
pub use messages::{ClientMessage, ErrorCode, PeerInfo, ServerMessage};
pub use reaper::RoomReaper;
pub use registry::{Peer, Registry, Room};
pub use server::{ServerHandle, SignalServer};
pub use service::{Session, SignalingService};
