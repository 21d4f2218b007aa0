//! Signaling client for WebRTC peers
//!
//! Connects to a huddle signaling server, authenticates, and drives the
//! room lifecycle on behalf of a WebRTC stack. The socket is split into
//! a writer task fed by a channel and a reader task that routes
//! acknowledgements to the request in flight and pushes room events to
//! subscribers while keeping a local mirror of the roster.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use huddle_core::TurnCredential;
use huddle_signal::messages::{ClientMessage, ErrorCode, PeerInfo, ServerMessage};

use crate::ice::RtcConfig;

/// Timeout for the WebSocket handshake and request acknowledgements
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the room-event broadcast channel
const EVENT_BUFFER: usize = 64;

/// Client-side signaling errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("server URL has no host")]
    MissingHost,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected the request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("unexpected acknowledgement from server")]
    UnexpectedReply,

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not in a room")]
    NotInRoom,

    #[error("a request is already awaiting its acknowledgement")]
    RequestInFlight,
}

/// Room events pushed by the server
#[derive(Clone, Debug)]
pub enum PeerEvent {
    /// A peer joined our room
    PeerJoined(PeerInfo),

    /// A peer left our room or dropped its connection
    PeerLeft { peer_id: String, user_id: String },

    /// A relayed negotiation payload addressed to us; `peer_id` is the
    /// sender
    Signal {
        peer_id: String,
        signal: serde_json::Value,
        kind: String,
    },

    /// An error acknowledgement arrived with no request in flight
    ServerError { code: ErrorCode, message: String },

    /// The signaling connection ended
    Disconnected,
}

/// Successful room entry
#[derive(Clone, Debug)]
pub struct JoinedRoom {
    pub room_id: String,
    /// Our server-assigned peer id, fresh for this join
    pub peer_id: String,
    /// Peers already present at join time
    pub peers: Vec<PeerInfo>,
    pub turn: TurnCredential,
}

#[derive(Default)]
struct ClientState {
    peer_id: Option<String>,
    room_id: Option<String>,
    turn: Option<TurnCredential>,
}

type PendingReply = Arc<Mutex<Option<oneshot::Sender<ServerMessage>>>>;

/// A connected, authenticated signaling session
pub struct PeerClient {
    user_id: String,
    device_id: Option<String>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    pending: PendingReply,
    peers: Arc<DashMap<String, PeerInfo>>,
    events: broadcast::Sender<PeerEvent>,
    state: Arc<Mutex<ClientState>>,
    http: reqwest::Client,
    http_base: String,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl PeerClient {
    /// Connect to a signaling server and authenticate as `user_id`
    pub async fn connect(
        server_url: &str,
        user_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::connect_with_device(server_url, user_id, None).await
    }

    /// Connect with an explicit device label alongside the user id
    pub async fn connect_with_device(
        server_url: &str,
        user_id: impl Into<String>,
        device_id: Option<String>,
    ) -> Result<Self, ClientError> {
        let user_id = user_id.into();
        let url = Url::parse(server_url)?;
        let http_base = http_base(&url)?;

        debug!("Connecting to signaling server at {}", url);
        let (ws_stream, _) = match timeout(REQUEST_TIMEOUT, connect_async(url.as_str())).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout),
        };
        let (mut write, mut read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let pending: PendingReply = Arc::new(Mutex::new(None));
        let peers: Arc<DashMap<String, PeerInfo>> = Arc::new(DashMap::new());

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode outbound message: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        let reader_task = {
            let pending = Arc::clone(&pending);
            let peers = Arc::clone(&peers);
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(frame) = read.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => continue,
                    };
                    match ServerMessage::from_json(&text) {
                        Ok(msg) => dispatch(msg, &pending, &peers, &events),
                        Err(e) => debug!("Ignoring undecodable server message: {}", e),
                    }
                }
                let _ = events.send(PeerEvent::Disconnected);
            })
        };

        let client = Self {
            user_id,
            device_id,
            outbound,
            pending,
            peers,
            events,
            state: Arc::new(Mutex::new(ClientState::default())),
            http: reqwest::Client::builder()
                .user_agent(format!("huddle-client/{}", env!("CARGO_PKG_VERSION")))
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            http_base,
            writer_task,
            reader_task,
        };

        let auth = ClientMessage::Authenticate {
            user_id: client.user_id.clone(),
            device_id: client.device_id.clone(),
        };
        match client.request(auth).await {
            Ok(ServerMessage::Authenticated { success: true }) => {
                debug!("Authenticated as {}", client.user_id);
                Ok(client)
            }
            Ok(ServerMessage::Error { code, message }) => {
                client.disconnect();
                Err(ClientError::Rejected { code, message })
            }
            Ok(_) => {
                client.disconnect();
                Err(ClientError::UnexpectedReply)
            }
            Err(e) => {
                client.disconnect();
                Err(e)
            }
        }
    }

    /// Join a room, creating it server-side when `room_id` is omitted.
    /// Seeds the roster mirror and stores the issued TURN credential.
    pub async fn join_room(&self, room_id: Option<String>) -> Result<JoinedRoom, ClientError> {
        let reply = self
            .request(ClientMessage::JoinRoom {
                room_id,
                user_id: Some(self.user_id.clone()),
                device_id: self.device_id.clone(),
                is_private: false,
                metadata: serde_json::Value::Null,
            })
            .await?;

        match reply {
            ServerMessage::RoomJoined {
                room_id,
                peer_id,
                existing_peers,
                turn_credentials,
                ..
            } => {
                self.peers.clear();
                for peer in &existing_peers {
                    self.peers.insert(peer.peer_id.clone(), peer.clone());
                }
                {
                    let mut state = self.state.lock();
                    state.peer_id = Some(peer_id.clone());
                    state.room_id = Some(room_id.clone());
                    state.turn = Some(turn_credentials.clone());
                }
                debug!("Joined room {} as peer {}", room_id, peer_id);
                Ok(JoinedRoom {
                    room_id,
                    peer_id,
                    peers: existing_peers,
                    turn: turn_credentials,
                })
            }
            ServerMessage::Error { code, message } => Err(ClientError::Rejected { code, message }),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Leave the current room. The connection stays usable; a later
    /// `join_room` enters under a fresh peer id. The TURN credential is
    /// kept - it ages out on its own.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        let room_id = self.state.lock().room_id.clone();
        if room_id.is_none() {
            return Err(ClientError::NotInRoom);
        }

        let reply = self.request(ClientMessage::LeaveRoom { room_id }).await?;
        match reply {
            ServerMessage::RoomLeft { .. } => {
                self.peers.clear();
                let mut state = self.state.lock();
                state.peer_id = None;
                state.room_id = None;
                Ok(())
            }
            ServerMessage::Error { code, message } => Err(ClientError::Rejected { code, message }),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Relay an opaque negotiation payload to `target`. Fire and forget:
    /// the server drops deliveries to departed peers without telling us.
    pub fn signal(
        &self,
        target: impl Into<String>,
        signal: serde_json::Value,
        kind: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.outbound
            .send(ClientMessage::Signal {
                target: target.into(),
                signal,
                kind: kind.into(),
            })
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Fetch fresh TURN credentials over HTTP, replacing the held set.
    /// Issued credentials are never revoked, they only age out, so the
    /// caller schedules this ahead of the TTL expiring.
    pub async fn refresh_turn_credentials(&self) -> Result<TurnCredential, ClientError> {
        let url = format!("{}/api/turn/credentials", self.http_base);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "userId": self.user_id }))
            .send()
            .await?
            .error_for_status()?;

        let credential: TurnCredential = response.json().await?;
        self.state.lock().turn = Some(credential.clone());
        Ok(credential)
    }

    /// RTCPeerConnection configuration built from the held TURN
    /// credential
    pub fn webrtc_config(&self) -> RtcConfig {
        RtcConfig::new(self.state.lock().turn.as_ref())
    }

    /// The room roster as observed so far, excluding ourselves
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Our peer id in the current room, if joined
    pub fn peer_id(&self) -> Option<String> {
        self.state.lock().peer_id.clone()
    }

    /// The room we are currently in, if any
    pub fn room_id(&self) -> Option<String> {
        self.state.lock().room_id.clone()
    }

    /// The TURN credential from the last join or refresh, if any
    pub fn turn_credential(&self) -> Option<TurnCredential> {
        self.state.lock().turn.clone()
    }

    /// Subscribe to room events. Only events after the subscription are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Tear the connection down. The server announces our departure to
    /// the room.
    pub fn disconnect(self) {
        self.reader_task.abort();
        self.writer_task.abort();
        self.peers.clear();
    }

    /// Send a request and wait for its acknowledgement. One request may
    /// be in flight at a time; a concurrent second request is refused
    /// rather than quietly displacing the first caller's reply slot.
    async fn request(&self, msg: ClientMessage) -> Result<ServerMessage, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.is_some() {
                return Err(ClientError::RequestInFlight);
            }
            *pending = Some(tx);
        }

        if self.outbound.send(msg).is_err() {
            self.pending.lock().take();
            return Err(ClientError::ConnectionClosed);
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                // Reclaim the slot so the next request is not wedged
                // behind an acknowledgement that never came
                self.pending.lock().take();
                Err(ClientError::Timeout)
            }
        }
    }
}

/// Route one server message: room events feed the mirror and the event
/// channel, everything else resolves the request in flight.
fn dispatch(
    msg: ServerMessage,
    pending: &PendingReply,
    peers: &DashMap<String, PeerInfo>,
    events: &broadcast::Sender<PeerEvent>,
) {
    match msg {
        ServerMessage::PeerJoined {
            peer_id,
            user_id,
            device_id,
        } => {
            let info = PeerInfo {
                peer_id: peer_id.clone(),
                user_id,
                device_id,
            };
            peers.insert(peer_id, info.clone());
            let _ = events.send(PeerEvent::PeerJoined(info));
        }
        ServerMessage::PeerLeft { peer_id, user_id } => {
            peers.remove(&peer_id);
            let _ = events.send(PeerEvent::PeerLeft { peer_id, user_id });
        }
        ServerMessage::Signal {
            peer_id,
            signal,
            kind,
        } => {
            let _ = events.send(PeerEvent::Signal {
                peer_id,
                signal,
                kind,
            });
        }
        reply => {
            if let Some(tx) = pending.lock().take() {
                let _ = tx.send(reply);
            } else if let ServerMessage::Error { code, message } = reply {
                warn!("Server error with no request in flight: {}", message);
                let _ = events.send(PeerEvent::ServerError { code, message });
            }
        }
    }
}

/// Derive the HTTP origin for the credential and stats routes from the
/// WebSocket URL (same listener, different protocol)
fn http_base(url: &Url) -> Result<String, ClientError> {
    let scheme = match url.scheme() {
        "wss" | "https" => "https",
        _ => "http",
    };
    let host = url.host_str().ok_or(ClientError::MissingHost)?;
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", scheme, host, port),
        None => format!("{}://{}", scheme, host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{ServerConfig, TurnConfig};
    use huddle_signal::{ServerHandle, SignalServer};

    async fn start_server() -> ServerHandle {
        let config = ServerConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            ..Default::default()
        };
        SignalServer::new(config, TurnConfig::default())
            .start()
            .await
            .unwrap()
    }

    fn ws_url(server: &ServerHandle) -> String {
        format!("ws://{}", server.local_addr())
    }

    async fn next_event(rx: &mut broadcast::Receiver<PeerEvent>) -> PeerEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[test]
    fn test_http_base_derivation() {
        let base = |s: &str| http_base(&Url::parse(s).unwrap()).unwrap();
        assert_eq!(base("ws://127.0.0.1:8787"), "http://127.0.0.1:8787");
        assert_eq!(base("wss://signal.example.com"), "https://signal.example.com");
        assert_eq!(base("wss://signal.example.com:9000"), "https://signal.example.com:9000");
    }

    #[tokio::test]
    async fn test_connect_join_and_credentials() {
        let server = start_server().await;
        let client = PeerClient::connect(&ws_url(&server), "alice").await.unwrap();

        let joined = client.join_room(None).await.unwrap();
        assert!(!joined.room_id.is_empty());
        assert!(!joined.peer_id.is_empty());
        assert!(joined.peers.is_empty());
        assert!(joined.turn.username.ends_with(":alice"));

        assert_eq!(client.peer_id(), Some(joined.peer_id.clone()));
        assert_eq!(client.room_id(), Some(joined.room_id.clone()));

        // Relay entry first, STUN fallback second
        let rtc = client.webrtc_config();
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[0].urls, joined.turn.urls);

        client.disconnect();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_join_announces_to_existing_peers() {
        let server = start_server().await;
        let alice =
            PeerClient::connect_with_device(&ws_url(&server), "alice", Some("laptop".into()))
                .await
                .unwrap();
        let joined = alice.join_room(Some("standup".into())).await.unwrap();
        assert_eq!(joined.room_id, "standup");

        let mut alice_events = alice.subscribe();

        let bob = PeerClient::connect(&ws_url(&server), "bob").await.unwrap();
        let bob_joined = bob.join_room(Some("standup".into())).await.unwrap();

        // Bob's roster carries alice with her device label
        assert_eq!(bob_joined.peers.len(), 1);
        assert_eq!(bob_joined.peers[0].user_id, "alice");
        assert_eq!(bob_joined.peers[0].device_id, "laptop");

        // Alice hears about bob
        match next_event(&mut alice_events).await {
            PeerEvent::PeerJoined(info) => {
                assert_eq!(info.user_id, "bob");
                assert_eq!(info.peer_id, bob_joined.peer_id);
            }
            other => panic!("expected peer-joined, got {:?}", other),
        }
        assert_eq!(alice.peers().len(), 1);

        alice.disconnect();
        bob.disconnect();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_signal_relay_between_peers() {
        let server = start_server().await;
        let alice = PeerClient::connect(&ws_url(&server), "alice").await.unwrap();
        alice.join_room(Some("call".into())).await.unwrap();

        let mut alice_events = alice.subscribe();

        let bob = PeerClient::connect(&ws_url(&server), "bob").await.unwrap();
        let bob_joined = bob.join_room(Some("call".into())).await.unwrap();
        let alice_peer_id = bob_joined.peers[0].peer_id.clone();

        // Consume the join announcement before the offer arrives
        next_event(&mut alice_events).await;

        let offer = serde_json::json!({"type": "offer", "sdp": "v=0..."});
        bob.signal(&alice_peer_id, offer.clone(), "offer").unwrap();

        match next_event(&mut alice_events).await {
            PeerEvent::Signal {
                peer_id,
                signal,
                kind,
            } => {
                assert_eq!(peer_id, bob_joined.peer_id);
                assert_eq!(kind, "offer");
                assert_eq!(signal, offer);
            }
            other => panic!("expected signal, got {:?}", other),
        }

        alice.disconnect();
        bob.disconnect();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_departed_peer_is_announced_and_unroutable() {
        let server = start_server().await;
        let alice = PeerClient::connect(&ws_url(&server), "alice").await.unwrap();
        alice.join_room(Some("meet".into())).await.unwrap();

        let mut alice_events = alice.subscribe();

        let bob = PeerClient::connect(&ws_url(&server), "bob").await.unwrap();
        let bob_joined = bob.join_room(Some("meet".into())).await.unwrap();
        let bob_peer_id = bob_joined.peer_id.clone();

        next_event(&mut alice_events).await;
        bob.disconnect();

        match next_event(&mut alice_events).await {
            PeerEvent::PeerLeft { peer_id, user_id } => {
                assert_eq!(peer_id, bob_peer_id);
                assert_eq!(user_id, "bob");
            }
            other => panic!("expected peer-left, got {:?}", other),
        }
        assert!(alice.peers().is_empty());

        // Signaling the departed peer is dropped server-side; the
        // connection stays healthy for further requests.
        alice
            .signal(&bob_peer_id, serde_json::json!({"type": "candidate"}), "candidate")
            .unwrap();
        alice.leave_room().await.unwrap();

        alice.disconnect();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_leave_room_clears_state_and_allows_rejoin() {
        let server = start_server().await;
        let client = PeerClient::connect(&ws_url(&server), "alice").await.unwrap();

        let first = client.join_room(None).await.unwrap();
        client.leave_room().await.unwrap();

        assert_eq!(client.peer_id(), None);
        assert!(client.peers().is_empty());
        assert!(matches!(
            client.leave_room().await,
            Err(ClientError::NotInRoom)
        ));

        // Rejoining the same room mints a fresh peer id
        let second = client.join_room(Some(first.room_id.clone())).await.unwrap();
        assert_eq!(second.room_id, first.room_id);
        assert_ne!(second.peer_id, first.peer_id);

        client.disconnect();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_request_is_refused() {
        let server = start_server().await;
        let client = PeerClient::connect(&ws_url(&server), "alice").await.unwrap();

        // Occupy the reply slot as if an acknowledgement were still owed
        let (tx, _rx) = oneshot::channel();
        *client.pending.lock() = Some(tx);

        assert!(matches!(
            client.join_room(None).await,
            Err(ClientError::RequestInFlight)
        ));

        // Releasing the slot lets the next request through untouched
        client.pending.lock().take();
        client.join_room(None).await.unwrap();

        client.disconnect();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_turn_credentials_over_http() {
        let server = start_server().await;
        let client = PeerClient::connect(&ws_url(&server), "carol").await.unwrap();

        // No join needed: issuance is stateless
        let refreshed = client.refresh_turn_credentials().await.unwrap();
        assert!(refreshed.username.ends_with(":carol"));
        assert_eq!(client.turn_credential(), Some(refreshed.clone()));

        let rtc = client.webrtc_config();
        assert_eq!(rtc.ice_servers[0].urls, refreshed.urls);

        client.disconnect();
        server.shutdown().await;
    }
}
