//! Huddle Signal Server
//!
//! WebSocket signaling server for WebRTC peer discovery and TURN
//! credential issuance.
//!
//! # Usage
//!
//! ```bash
//! # Development defaults
//! huddle-signal --port 8787
//!
//! # Production: point at a real coturn relay
//! TURN_AUTH_SECRET=... huddle-signal --turn-host turn.example.com
//! ```

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use huddle_core::{
    ServerConfig, TurnConfig, DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_PORT,
    DEFAULT_ROOM_TIMEOUT_MS, DEFAULT_TURN_PORT, DEFAULT_TURN_TLS_PORT, DEV_TURN_SECRET,
};
use huddle_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "huddle-signal")]
#[command(about = "Huddle signaling server for WebRTC peer coordination")]
#[command(version)]
struct Args {
    /// Bind address
    #[arg(short, long, env = "HOST", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How long an empty room survives before cleanup, in milliseconds
    #[arg(long, env = "SIGNAL_ROOM_TIMEOUT", default_value_t = DEFAULT_ROOM_TIMEOUT_MS)]
    room_timeout_ms: u64,

    /// Maximum concurrent WebSocket connections per source IP
    #[arg(long, env = "MAX_CONNECTIONS_PER_IP", default_value_t = DEFAULT_MAX_CONNECTIONS_PER_IP)]
    max_connections_per_ip: usize,

    /// Hostname of the TURN relay handed to clients
    #[arg(long, env = "COTURN_HOST", default_value = "localhost")]
    turn_host: String,

    /// TURN relay port for UDP and TCP
    #[arg(long, env = "TURN_PORT", default_value_t = DEFAULT_TURN_PORT)]
    turn_port: u16,

    /// TURN-over-TLS relay port
    #[arg(long, env = "TURN_PORT_TLS", default_value_t = DEFAULT_TURN_TLS_PORT)]
    turn_tls_port: u16,

    /// TURN realm
    #[arg(long, env = "TURN_REALM", default_value = "huddle")]
    turn_realm: String,

    /// Shared secret for TURN REST API credentials. Must match the
    /// relay's static-auth-secret.
    #[arg(long, env = "TURN_AUTH_SECRET", default_value = DEV_TURN_SECRET, hide_default_value = true)]
    turn_auth_secret: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.bind,
        port: args.port,
        room_timeout: Duration::from_millis(args.room_timeout_ms),
        max_connections_per_ip: args.max_connections_per_ip,
    };
    let turn = TurnConfig {
        host: args.turn_host,
        port: args.turn_port,
        tls_port: args.turn_tls_port,
        realm: args.turn_realm,
        secret: args.turn_auth_secret,
    };

    if turn.uses_dev_secret() {
        warn!(
            "TURN_AUTH_SECRET not set; issued credentials will not be \
             accepted by a production relay"
        );
    }

    info!("Starting Huddle Signal Server");
    info!("Issuing TURN credentials for relay at {}:{}", turn.host, turn.port);
    let handle = SignalServer::new(config, turn).start().await?;
    info!("Listening on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    handle.shutdown().await;

    Ok(())
}
