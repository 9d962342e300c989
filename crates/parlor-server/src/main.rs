//! Parlor server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate and the default rooms (development)
//! parlor-server --bind 0.0.0.0:4433
//!
//! # Custom rooms, TLS certificate, no grace window
//! parlor-server --cert cert.pem --key key.pem \
//!     --room "lobby:Lobby:Say hi" --room "dev:Dev:Build talk" \
//!     --default-room lobby --grace-secs 0
//! ```

use std::time::Duration;

use clap::{Parser, ValueEnum};
use parlor_core::RoomSpec;
use parlor_proto::RoomId;
use parlor_server::{
    BroadcastPolicy, DriverConfig, DuplicateLoginPolicy, Server, ServerRuntimeConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parlor chat relay server
#[derive(Parser, Debug)]
#[command(name = "parlor-server")]
#[command(about = "Parlor room-based chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Room as `id:Name:Description`; repeat for more. Defaults to general
    /// and random.
    #[arg(long = "room", value_parser = parse_room)]
    rooms: Vec<RoomSpec>,

    /// Room new users are placed in
    #[arg(long, default_value = "general")]
    default_room: String,

    /// Seconds a disconnected user stays known; 0 keeps them forever
    #[arg(long, default_value = "120")]
    grace_secs: u64,

    /// Seconds a connection may take to send its hello
    #[arg(long, default_value = "30")]
    handshake_timeout_secs: u64,

    /// Outbound queue capacity per connection, in frames
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// What to do when a connection's outbound queue is full
    #[arg(long, value_enum, default_value = "drop-event")]
    broadcast_policy: PolicyArg,

    /// What to do when an identity logs in twice
    #[arg(long, value_enum, default_value = "take-over")]
    duplicate_login: DuplicateArg,

    /// Milliseconds between housekeeping ticks
    #[arg(long, default_value = "1000")]
    tick_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    DropEvent,
    Disconnect,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DuplicateArg {
    TakeOver,
    Reject,
}

fn parse_room(raw: &str) -> Result<RoomSpec, String> {
    let mut parts = raw.splitn(3, ':');
    let id = parts.next().map(str::trim).filter(|id| !id.is_empty());
    let Some(id) = id else {
        return Err(format!("room '{raw}' has no id"));
    };
    let name = parts.next().map(str::trim).filter(|n| !n.is_empty()).unwrap_or(id);
    let description = parts.next().map(str::trim).unwrap_or_default();
    Ok(RoomSpec::new(id, name, description))
}

impl Args {
    fn into_config(self) -> ServerRuntimeConfig {
        let rooms = if self.rooms.is_empty() { RoomSpec::defaults() } else { self.rooms };

        ServerRuntimeConfig {
            bind_address: self.bind,
            cert_path: self.cert,
            key_path: self.key,
            outbound_capacity: self.outbound_capacity,
            broadcast_policy: match self.broadcast_policy {
                PolicyArg::DropEvent => BroadcastPolicy::DropEvent,
                PolicyArg::Disconnect => BroadcastPolicy::Disconnect,
            },
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(10)),
            driver: DriverConfig {
                rooms,
                default_room: RoomId::from(self.default_room),
                max_connections: self.max_connections,
                handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
                grace_window: (self.grace_secs > 0).then(|| Duration::from_secs(self.grace_secs)),
                duplicate_login: match self.duplicate_login {
                    DuplicateArg::TakeOver => DuplicateLoginPolicy::TakeOver,
                    DuplicateArg::Reject => DuplicateLoginPolicy::Reject,
                },
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Parlor server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = args.into_config();
    let rooms: Vec<_> = config.driver.rooms.iter().map(|room| room.id.to_string()).collect();
    tracing::info!(?rooms, default_room = %config.driver.default_room, "Rooms configured");

    let server = Server::bind(config)?;
    let stats = server.stats_handle();

    tracing::info!("Server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            server.shutdown();
        },
    }

    let stats = stats.stats().await;
    tracing::info!(
        total_messages = stats.total_messages,
        known_users = stats.known_users,
        uptime_secs = stats.uptime.as_secs(),
        "Server stopped"
    );

    Ok(())
}
