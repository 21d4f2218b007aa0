//! Huddle Core - Shared configuration and TURN credential primitives
//!
//! This crate contains the foundational pieces used by both the signaling
//! server and the client-side coordinator. It has no networking code.

pub mod config;
pub mod turn;

pub use config::{ServerConfig, TurnConfig, DEV_TURN_SECRET};
pub use turn::{CredentialIssuer, TurnCredential};

/// Default signaling listener port
pub const DEFAULT_PORT: u16 = 8787;

/// Default TURN relay port (UDP and TCP)
pub const DEFAULT_TURN_PORT: u16 = 3478;

/// Default TURN-over-TLS port
pub const DEFAULT_TURN_TLS_PORT: u16 = 5349;

/// Default TURN credential lifetime in seconds (24 hours)
pub const DEFAULT_TURN_TTL_SECS: u64 = 86_400;

/// Default empty-room timeout in milliseconds (1 hour)
pub const DEFAULT_ROOM_TIMEOUT_MS: u64 = 3_600_000;

/// Default cap on concurrent connections from a single source IP
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: usize = 50;
