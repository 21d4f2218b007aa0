//! Connection registry: rooms and the global peer index
//!
//! `Registry` owns the only mutable shared state in the server - the room
//! map and the global peer map. Callers wrap it in a single
//! `parking_lot::Mutex` and take the lock once per handled message, which
//! is what keeps multi-step operations (snapshot the roster, then insert
//! the newcomer) atomic. Both maps are mutated together here, so a peer id
//! found in a room's member set always resolves to a registry peer whose
//! `room_id` points back at that room.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::messages::{PeerInfo, ServerMessage};

/// Device label recorded when a client does not announce one
pub const DEFAULT_DEVICE_ID: &str = "unknown";

/// A connected peer that has joined a room
pub struct Peer {
    /// Process-unique peer identifier, minted at join time
    pub peer_id: String,

    /// Identity claimed by the client
    pub user_id: String,

    /// Device label claimed by the client
    pub device_id: String,

    /// The room this peer currently occupies
    pub room_id: String,

    /// When the peer joined
    pub joined_at: Instant,

    /// Outbound channel to the peer's connection
    pub sender: UnboundedSender<ServerMessage>,
}

impl Peer {
    /// The peer as presented to other room members
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

/// A named room where peers discover each other
pub struct Room {
    pub room_id: String,

    /// User id that first created the room
    pub creator_id: String,

    pub is_private: bool,

    /// Opaque annotations supplied at creation, never interpreted
    pub metadata: serde_json::Value,

    /// Peer ids of current members
    members: HashSet<String>,

    created_at: Instant,
}

impl Room {
    fn new(room_id: String, creator_id: String, is_private: bool, metadata: serde_json::Value) -> Self {
        Self {
            room_id,
            creator_id,
            is_private,
            metadata,
            members: HashSet::new(),
            created_at: Instant::now(),
        }
    }

    /// Number of peers currently in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Time since the room was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Rooms plus the global peer index, mutated together
pub struct Registry {
    rooms: HashMap<String, Room>,
    peers: HashMap<String, Peer>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            peers: HashMap::new(),
        }
    }

    /// Find a room by id, creating it when absent. With no id requested,
    /// mints a fresh one. Returns the effective room id.
    ///
    /// Creation is lazy and cheap; rooms are only ever destroyed by
    /// [`Registry::sweep_stale`], never by their last peer leaving.
    pub fn create_or_get_room(
        &mut self,
        room_id: Option<String>,
        creator_id: &str,
        is_private: bool,
        metadata: serde_json::Value,
    ) -> String {
        let room_id = match room_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => self.fresh_room_id(),
        };

        self.rooms.entry(room_id.clone()).or_insert_with(|| {
            Room::new(room_id.clone(), creator_id.to_string(), is_private, metadata)
        });

        room_id
    }

    /// Register a peer. The peer's room must already exist
    /// (see [`Registry::create_or_get_room`]).
    pub fn add_peer(&mut self, peer: Peer) {
        if let Some(room) = self.rooms.get_mut(&peer.room_id) {
            room.members.insert(peer.peer_id.clone());
        }
        self.peers.insert(peer.peer_id.clone(), peer);
    }

    /// Drop a peer from both maps. Returns the removed peer so the caller
    /// can announce the departure; the room itself stays, even when empty.
    pub fn remove_peer(&mut self, peer_id: &str) -> Option<Peer> {
        let peer = self.peers.remove(peer_id)?;
        if let Some(room) = self.rooms.get_mut(&peer.room_id) {
            room.members.remove(peer_id);
        }
        Some(peer)
    }

    /// The current roster of a room, optionally excluding one peer id
    pub fn snapshot_peers(&self, room_id: &str, excluding: Option<&str>) -> Vec<PeerInfo> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter(|id| excluding != Some(id.as_str()))
            .filter_map(|id| self.peers.get(id))
            .map(Peer::info)
            .collect()
    }

    /// Outbound channel of a single peer, if connected
    pub fn peer_sender(&self, peer_id: &str) -> Option<UnboundedSender<ServerMessage>> {
        self.peers.get(peer_id).map(|p| p.sender.clone())
    }

    /// Outbound channels of a room's members, optionally excluding one
    pub fn room_senders(
        &self,
        room_id: &str,
        excluding: Option<&str>,
    ) -> Vec<UnboundedSender<ServerMessage>> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter(|id| excluding != Some(id.as_str()))
            .filter_map(|id| self.peers.get(id))
            .map(|p| p.sender.clone())
            .collect()
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn peer(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// Remove rooms that are empty and older than `timeout`.
    /// Returns the ids of the removed rooms. Occupied rooms are never
    /// touched, whatever their age.
    pub fn sweep_stale(&mut self, timeout: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.is_empty() && room.age() > timeout)
            .map(|room| room.room_id.clone())
            .collect();

        for room_id in &stale {
            self.rooms.remove(room_id);
        }

        stale
    }

    /// Room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Mint a peer id not currently in use
    pub fn fresh_peer_id(&self) -> String {
        loop {
            let id = random_hex_id();
            if !self.peers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Mint a room id not currently in use
    pub fn fresh_room_id(&self) -> String {
        loop {
            let id = random_hex_id();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// 8 random bytes as 16 hex chars
fn random_hex_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).expect("RNG failed - system entropy source unavailable");
    hex::encode(bytes)
}
