//! Configuration for the Huddle signaling server
//!
//! All settings arrive through environment variables (or the matching CLI
//! flags wired up in the `huddle-signal` binary):
//! - `HOST` / `PORT`: signaling listener bind address
//! - `SIGNAL_ROOM_TIMEOUT`: empty-room timeout in milliseconds
//! - `MAX_CONNECTIONS_PER_IP`: per-source-IP connection cap
//! - `COTURN_HOST` / `TURN_PORT` / `TURN_PORT_TLS` / `TURN_REALM` /
//!   `TURN_AUTH_SECRET`: TURN relay coordinates and the shared HMAC secret

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::{
    DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_PORT, DEFAULT_ROOM_TIMEOUT_MS, DEFAULT_TURN_PORT,
    DEFAULT_TURN_TLS_PORT,
};

/// Placeholder secret used when `TURN_AUTH_SECRET` is unset.
///
/// Deployments must override this; the binary logs a warning when it is
/// still in effect at startup.
pub const DEV_TURN_SECRET: &str = "huddle-dev-secret";

/// Signaling server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the shared WebSocket/HTTP listener
    pub host: IpAddr,
    /// Listener port
    pub port: u16,
    /// How long an empty room survives before the reaper deletes it
    pub room_timeout: Duration,
    /// Maximum simultaneous connections accepted from one source IP
    pub max_connections_per_ip: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            room_timeout: Duration::from_millis(DEFAULT_ROOM_TIMEOUT_MS),
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

impl ServerConfig {
    /// The socket address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// TURN relay coordinates and the credential-signing secret
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Hostname of the external TURN relay (coturn)
    pub host: String,
    /// TURN port for UDP and TCP transports
    pub port: u16,
    /// TURN-over-TLS port
    pub tls_port: u16,
    /// Authentication realm (must match the relay's `realm` setting)
    pub realm: String,
    /// Shared HMAC secret (must match the relay's `static-auth-secret`)
    pub secret: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_TURN_PORT,
            tls_port: DEFAULT_TURN_TLS_PORT,
            realm: "huddle".to_string(),
            secret: DEV_TURN_SECRET.to_string(),
        }
    }
}

impl TurnConfig {
    /// Whether the signing secret is still the development placeholder
    pub fn uses_dev_secret(&self) -> bool {
        self.secret == DEV_TURN_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8787);
        assert_eq!(config.room_timeout, Duration::from_secs(3600));
        assert_eq!(config.max_connections_per_ip, 50);
        assert!(config.host.is_unspecified());
    }

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_turn_defaults() {
        let config = TurnConfig::default();
        assert_eq!(config.port, 3478);
        assert_eq!(config.tls_port, 5349);
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn test_custom_secret_not_flagged() {
        let config = TurnConfig {
            secret: "s3cr3t".to_string(),
            ..Default::default()
        };
        assert!(!config.uses_dev_secret());
    }
}
