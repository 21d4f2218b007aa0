//! Per-connection signaling logic
//!
//! Each connection walks a small state machine: connected, then
//! authenticated, then in a room, and back to authenticated on an explicit
//! leave. `Session` carries that state; `SignalingService` holds what is
//! shared across connections (the registry and the credential issuer) and
//! dispatches one decoded message at a time.
//!
//! Handlers take the registry lock at most once, never await while holding
//! it, and push cross-connection traffic through the peers' unbounded
//! channels - so a slow consumer can never stall the connection that is
//! currently being handled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use huddle_core::CredentialIssuer;

use crate::messages::{ClientMessage, ErrorCode, ServerMessage};
use crate::registry::{Peer, Registry, DEFAULT_DEVICE_ID};

/// Identity claimed by a connection via `authenticate`
#[derive(Clone, Debug)]
pub struct Identity {
    pub user_id: String,
    pub device_id: String,
}

/// Connection-local state threaded through the message handlers
pub struct Session {
    addr: SocketAddr,
    identity: Option<Identity>,
    peer_id: Option<String>,
}

impl Session {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            identity: None,
            peer_id: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The peer id held while in a room
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }
}

/// Shared signaling state and message dispatch
pub struct SignalingService {
    registry: Arc<Mutex<Registry>>,
    issuer: CredentialIssuer,
}

impl SignalingService {
    pub fn new(issuer: CredentialIssuer) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::new())),
            issuer,
        }
    }

    /// Handle to the registry, shared with the reaper and the stats endpoint
    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        self.registry.clone()
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    /// Process one decoded message for `session`, returning the reply to
    /// send back on that connection (if any). `outbound` is the
    /// connection's own channel; it becomes the peer's registered sender
    /// on a successful join.
    pub fn handle_message(
        &self,
        session: &mut Session,
        msg: ClientMessage,
        outbound: &UnboundedSender<ServerMessage>,
    ) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Authenticate { user_id, device_id } => {
                self.authenticate(session, user_id, device_id)
            }
            ClientMessage::JoinRoom {
                room_id,
                user_id,
                device_id,
                is_private,
                metadata,
            } => self.join_room(session, room_id, user_id, device_id, is_private, metadata, outbound),
            ClientMessage::Signal {
                target,
                signal,
                kind,
            } => self.relay_signal(session, &target, signal, kind),
            ClientMessage::LeaveRoom { .. } => self.leave_room(session),
        }
    }

    /// Transport-level disconnect: same cleanup as leave, no reply
    pub fn disconnect(&self, session: &mut Session) {
        if let Some(peer_id) = session.peer_id.take() {
            self.remove_and_notify(&peer_id);
        }
    }

    fn authenticate(
        &self,
        session: &mut Session,
        user_id: String,
        device_id: Option<String>,
    ) -> Option<ServerMessage> {
        if user_id.is_empty() {
            return Some(ServerMessage::error(
                ErrorCode::MissingUserId,
                "userId is required",
            ));
        }

        // The claimed identity is taken at face value - there is no
        // credential check at this boundary. Everything downstream (TURN
        // usernames, presence events) carries whatever the client claimed.
        session.identity = Some(Identity {
            user_id,
            device_id: device_id.unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
        });

        Some(ServerMessage::Authenticated { success: true })
    }

    #[allow(clippy::too_many_arguments)]
    fn join_room(
        &self,
        session: &mut Session,
        room_id: Option<String>,
        user_id: Option<String>,
        device_id: Option<String>,
        is_private: bool,
        metadata: serde_json::Value,
        outbound: &UnboundedSender<ServerMessage>,
    ) -> Option<ServerMessage> {
        if session.identity.is_none() {
            return Some(ServerMessage::error(
                ErrorCode::NotAuthenticated,
                "Authenticate before joining a room",
            ));
        }
        if session.peer_id.is_some() {
            return Some(ServerMessage::error(
                ErrorCode::AlreadyInRoom,
                "Already in a room",
            ));
        }
        let user_id = match user_id.filter(|u| !u.is_empty()) {
            Some(u) => u,
            None => {
                return Some(ServerMessage::error(
                    ErrorCode::MissingUserId,
                    "userId is required",
                ))
            }
        };
        let device_id = device_id.unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());

        // One lock scope makes roster-snapshot plus insert atomic: the
        // snapshot can never contain the joiner, and nobody can slip in
        // between the two steps.
        let (room_id, peer_id, existing_peers, notify) = {
            let mut registry = self.registry.lock();
            let room_id = registry.create_or_get_room(room_id, &user_id, is_private, metadata);
            let peer_id = registry.fresh_peer_id();
            let existing_peers = registry.snapshot_peers(&room_id, None);
            let notify = registry.room_senders(&room_id, None);
            registry.add_peer(Peer {
                peer_id: peer_id.clone(),
                user_id: user_id.clone(),
                device_id: device_id.clone(),
                room_id: room_id.clone(),
                joined_at: Instant::now(),
                sender: outbound.clone(),
            });
            (room_id, peer_id, existing_peers, notify)
        };

        let announcement = ServerMessage::PeerJoined {
            peer_id: peer_id.clone(),
            user_id: user_id.clone(),
            device_id,
        };
        for tx in &notify {
            let _ = tx.send(announcement.clone());
        }

        let turn_credentials = self.issuer.issue(&user_id, None);
        session.peer_id = Some(peer_id.clone());
        info!("Peer {} ({}) joined room {}", peer_id, user_id, room_id);

        Some(ServerMessage::RoomJoined {
            success: true,
            room_id,
            peer_id,
            existing_peers,
            turn_credentials,
        })
    }

    /// Fire-and-forget relay: no acknowledgement, no NACK. Unknown targets
    /// and senders that never joined are logged and dropped.
    fn relay_signal(
        &self,
        session: &Session,
        target: &str,
        signal: serde_json::Value,
        kind: String,
    ) -> Option<ServerMessage> {
        let Some(peer_id) = session.peer_id() else {
            warn!("Dropping signal from {}: connection never joined a room", session.addr);
            return None;
        };

        // Bind first so the registry guard drops before the send
        let sender = self.registry.lock().peer_sender(target);
        match sender {
            Some(tx) => {
                let forwarded = ServerMessage::Signal {
                    peer_id: peer_id.to_string(),
                    signal,
                    kind,
                };
                if tx.send(forwarded).is_err() {
                    warn!("Dropping signal to {}: peer disconnected mid-delivery", target);
                }
            }
            None => {
                warn!("Dropping signal to unknown peer {}", target);
            }
        }
        None
    }

    /// Leaving is idempotent: a connection that is not in a room still gets
    /// a success acknowledgement.
    fn leave_room(&self, session: &mut Session) -> Option<ServerMessage> {
        if let Some(peer_id) = session.peer_id.take() {
            self.remove_and_notify(&peer_id);
        }
        Some(ServerMessage::RoomLeft { success: true })
    }

    fn remove_and_notify(&self, peer_id: &str) {
        let (peer, notify) = {
            let mut registry = self.registry.lock();
            match registry.remove_peer(peer_id) {
                Some(peer) => {
                    let notify = registry.room_senders(&peer.room_id, None);
                    (peer, notify)
                }
                None => return,
            }
        };

        let departure = ServerMessage::PeerLeft {
            peer_id: peer.peer_id.clone(),
            user_id: peer.user_id.clone(),
        };
        for tx in &notify {
            let _ = tx.send(departure.clone());
        }

        info!("Peer {} ({}) left room {}", peer.peer_id, peer.user_id, peer.room_id);
    }
}
