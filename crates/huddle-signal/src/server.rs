//! TCP listener and per-connection driver
//!
//! One listener serves both protocols: each accepted connection is peeked
//! and routed to the HTTP handler unless the request head carries an
//! `Upgrade: websocket` header. WebSocket connections then run a single
//! task that multiplexes inbound frames and outbound registry events over
//! the unsplit stream, so control frames can be answered in-line.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use huddle_core::{CredentialIssuer, ServerConfig, TurnConfig};

use crate::http::{handle_http_request, HttpContext};
use crate::limiter::ConnectionLimiter;
use crate::messages::{ClientMessage, ErrorCode, ServerMessage};
use crate::reaper::RoomReaper;
use crate::service::{Session, SignalingService};

/// How much of a new connection to peek when deciding HTTP vs WebSocket
const SNIFF_BYTES: usize = 1024;

/// Re-peek cadence while a request head is still arriving
const SNIFF_POLL: Duration = Duration::from_millis(2);

/// Routing falls back to whatever has arrived once this much time passes
const SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// The signaling server: owns the shared state and accepts connections
pub struct SignalServer {
    config: ServerConfig,
    service: Arc<SignalingService>,
    limiter: ConnectionLimiter,
}

/// Handle to a running server. Dropping it leaves the server running;
/// call [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the accept loop and the reaper to stop, and wait for the
    /// accept loop to finish. In-flight connections are not drained.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

impl SignalServer {
    pub fn new(config: ServerConfig, turn: TurnConfig) -> Self {
        let limiter = ConnectionLimiter::new(config.max_connections_per_ip);
        let service = Arc::new(SignalingService::new(CredentialIssuer::new(turn)));
        Self {
            config,
            service,
            limiter,
        }
    }

    /// Bind the listener, spawn the reaper and the accept loop, and
    /// return a handle for shutdown.
    pub async fn start(self) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown, _) = broadcast::channel(1);

        let reaper = RoomReaper::new(self.service.registry(), self.config.room_timeout);
        tokio::spawn(reaper.run(shutdown.subscribe()));

        let http_ctx = Arc::new(HttpContext::new(
            self.service.registry(),
            self.limiter.clone(),
            self.service.issuer().clone(),
        ));

        let service = self.service;
        let limiter = self.limiter;
        let mut shutdown_rx = shutdown.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!("Accept failed: {}", e);
                                continue;
                            }
                        };

                        let service = Arc::clone(&service);
                        let limiter = limiter.clone();
                        let http_ctx = Arc::clone(&http_ctx);
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, addr, service, limiter, http_ctx).await
                            {
                                debug!("Connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Drive one accepted connection to completion
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<SignalingService>,
    limiter: ConnectionLimiter,
    http_ctx: Arc<HttpContext>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut sniff = [0u8; SNIFF_BYTES];
    let n = sniff_head(&stream, &mut sniff).await?;
    if n == 0 {
        return Ok(());
    }

    // WebSocket handshakes are GETs too, so the method alone cannot
    // distinguish the two protocols. The Upgrade header can.
    let head = String::from_utf8_lossy(&sniff[..n]).to_lowercase();
    if !head.contains("upgrade: websocket") {
        return handle_http_request(stream, addr, &http_ctx).await;
    }

    // Plain HTTP is exempt from the per-IP cap; only signaling
    // connections count. Rejected sockets are dropped before the
    // handshake, so the client sees a transport-level close.
    let ip = addr.ip();
    if !limiter.try_acquire(ip) {
        warn!("Rejecting connection from {}: per-IP limit reached", ip);
        return Ok(());
    }

    let mut ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            limiter.release(ip);
            return Err(e.into());
        }
    };
    debug!("WebSocket connection established with {}", addr);

    let mut session = Session::new(addr);
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    loop {
        tokio::select! {
            inbound = ws_stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match ClientMessage::from_json(&text) {
                            Ok(msg) => service.handle_message(&mut session, msg, &tx),
                            Err(e) => {
                                debug!("Undecodable message from {}: {}", addr, e);
                                Some(ServerMessage::error(
                                    ErrorCode::InvalidMessage,
                                    "could not parse message",
                                ))
                            }
                        };
                        if let Some(reply) = reply {
                            if send_message(&mut ws_stream, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_stream.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if send_message(&mut ws_stream, &msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    service.disconnect(&mut session);
    limiter.release(ip);
    debug!("Connection from {} closed", addr);
    Ok(())
}

/// Peek at the start of a connection until the request head is complete
/// (blank line seen), the buffer is full, the peer closes, or the
/// deadline passes. A handshake split across segments would otherwise be
/// routed before its Upgrade header arrived. The peeked bytes stay
/// queued for whichever handler takes the stream; since a peek returns
/// immediately while any data is pending, incomplete heads are re-polled
/// on a short interval.
async fn sniff_head(stream: &TcpStream, buf: &mut [u8; SNIFF_BYTES]) -> io::Result<usize> {
    let deadline = Instant::now() + SNIFF_TIMEOUT;
    loop {
        let n = stream.peek(buf).await?;
        let head_complete = buf[..n].windows(4).any(|w| w == b"\r\n\r\n");
        if n == 0 || n == buf.len() || head_complete || Instant::now() >= deadline {
            return Ok(n);
        }
        tokio::time::sleep(SNIFF_POLL).await;
    }
}

/// Encode a message and write it as a text frame. An encode failure is
/// logged and swallowed; a write failure is returned so the caller can
/// tear the connection down.
async fn send_message(
    ws_stream: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    msg: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match msg.to_json() {
        Ok(json) => ws_stream.send(Message::Text(json)).await,
        Err(e) => {
            warn!("Failed to encode outbound message: {}", e);
            Ok(())
        }
    }
}
