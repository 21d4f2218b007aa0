//! Plain-HTTP surface sharing the signaling listener
//!
//! The signaling port doubles as a small HTTP endpoint for health checks,
//! out-of-band TURN credential issuance, and an ops stats snapshot. The
//! server peeks each accepted connection and routes requests without an
//! `Upgrade: websocket` header here. One request per connection
//! (`Connection: close`), no keep-alive, no TLS - the expectation is a
//! reverse proxy in front for anything public.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use huddle_core::CredentialIssuer;

use crate::limiter::ConnectionLimiter;
use crate::registry::Registry;

/// Request head larger than this is rejected outright
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Bodies larger than this are rejected outright
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state the HTTP routes read from
pub struct HttpContext {
    registry: Arc<Mutex<Registry>>,
    limiter: ConnectionLimiter,
    issuer: CredentialIssuer,
    started_at: Instant,
}

/// Body of `POST /api/turn/credentials`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRequest {
    user_id: Option<String>,
    /// Optional credential lifetime override, in seconds
    ttl: Option<u64>,
}

/// Response of `GET /api/stats`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    room_count: usize,
    peer_count: usize,
    /// Source IPs currently holding at least one connection
    ip_connection_count: usize,
    /// Seconds since the server started
    uptime: u64,
    /// Resident set size in bytes; null where unsupported
    memory_usage: Option<u64>,
    /// Unix epoch milliseconds
    timestamp: u64,
}

impl HttpContext {
    pub fn new(
        registry: Arc<Mutex<Registry>>,
        limiter: ConnectionLimiter,
        issuer: CredentialIssuer,
    ) -> Self {
        Self {
            registry,
            limiter,
            issuer,
            started_at: Instant::now(),
        }
    }

    /// Dispatch a parsed request to its handler
    fn route(&self, method: &str, path: &str, body: &[u8]) -> (&'static str, String) {
        match (method, path) {
            ("GET", "/health") => ("200 OK", r#"{"status":"healthy"}"#.to_string()),
            ("GET", "/") => (
                "200 OK",
                format!(
                    r#"{{"service":"huddle-signal","status":"ok","version":"{}"}}"#,
                    env!("CARGO_PKG_VERSION")
                ),
            ),
            ("POST", "/api/turn/credentials") => self.turn_credentials_reply(body),
            ("GET", "/api/stats") => self.stats_reply(),
            _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
        }
    }

    fn turn_credentials_reply(&self, body: &[u8]) -> (&'static str, String) {
        let request: CredentialRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(_) => {
                return (
                    "400 Bad Request",
                    r#"{"error":"invalid JSON body"}"#.to_string(),
                )
            }
        };

        let Some(user_id) = request.user_id.filter(|u| !u.is_empty()) else {
            return (
                "400 Bad Request",
                r#"{"error":"userId is required"}"#.to_string(),
            );
        };

        let credential = self
            .issuer
            .issue(&user_id, request.ttl.map(Duration::from_secs));
        match serde_json::to_string(&credential) {
            Ok(json) => ("200 OK", json),
            Err(_) => (
                "500 Internal Server Error",
                r#"{"error":"serialization failed"}"#.to_string(),
            ),
        }
    }

    fn stats_reply(&self) -> (&'static str, String) {
        let (room_count, peer_count) = {
            let registry = self.registry.lock();
            (registry.room_count(), registry.peer_count())
        };

        let stats = StatsResponse {
            room_count,
            peer_count,
            ip_connection_count: self.limiter.tracked_ips(),
            uptime: self.started_at.elapsed().as_secs(),
            memory_usage: resident_memory_bytes(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_millis() as u64,
        };

        match serde_json::to_string(&stats) {
            Ok(json) => ("200 OK", json),
            Err(_) => (
                "500 Internal Server Error",
                r#"{"error":"serialization failed"}"#.to_string(),
            ),
        }
    }
}

/// Serve one HTTP request on an accepted connection, then close it
pub async fn handle_http_request(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: &HttpContext,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (method, path, body) = read_request(&mut stream).await?;
    debug!("HTTP {} {} from {}", method, path, peer_addr);

    let (status, body) = ctx.route(&method, &path, &body);
    write_response(&mut stream, status, &body).await?;
    Ok(())
}

/// Read one request: head until the blank line, then `Content-Length`
/// bytes of body.
async fn read_request(
    stream: &mut TcpStream,
) -> Result<(String, String, Vec<u8>), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err("request head too large".into());
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err("connection closed mid-request".into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let (method, path, content_length) =
        parse_head(&head).ok_or("malformed request line")?;
    if content_length > MAX_BODY_BYTES {
        return Err("request body too large".into());
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err("connection closed mid-body".into());
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok((method, path, body))
}

/// Offset of the `\r\n\r\n` separating head from body
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Pull method, path, and Content-Length out of a request head
fn parse_head(head: &str) -> Option<(String, String, usize)> {
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);

    Some((method, path, content_length))
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    body: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Resident set size from /proc/self/statm
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}
