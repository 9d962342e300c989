//! Parlor production server.
//!
//! Production runtime for the Parlor chat relay: Quinn for QUIC transport,
//! Tokio for the async runtime, system time and OS randomness for the
//! environment.
//!
//! # Architecture
//!
//! [`ServerDriver`] is the Sans-IO engine: it consumes [`ServerEvent`]s and
//! returns [`ServerAction`]s without touching the network. [`Server`] feeds it
//! events from QUIC connections and executes the actions. The driver sits
//! behind one async mutex, which makes it the single serialization point for
//! every mutation; outbound frames are handed to per-session bounded queues
//! with a non-blocking offer, so holding the lock never waits on a peer.
//!
//! # Components
//!
//! - [`ServerDriver`]: action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: production runtime that executes driver actions
//! - [`QuinnTransport`]: QUIC transport via Quinn
//! - [`SystemEnv`]: production environment (real time, OS RNG)
//! - [`StatsHandle`]: health and counters for an external status endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod executor;
mod server_error;
mod system_env;
mod transport;

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
pub use driver::{
    DEFAULT_GRACE_WINDOW, DEFAULT_MAX_CONNECTIONS, DriverConfig, DuplicateLoginPolicy, LogLevel,
    ServerAction, ServerDriver, ServerEvent, ServerStats,
};
pub use error::ServerError;
pub use executor::{BroadcastPolicy, DEFAULT_OUTBOUND_CAPACITY, OutboundRegistry};
use parlor_core::{Environment, SessionId};
use parlor_proto::{ErrorPayload, Frame, FrameHeader, Payload};
pub use server_error::{DriverError, ExecutorError};
pub use system_env::SystemEnv;
use tokio::sync::{Mutex, RwLock, mpsc};
pub use transport::{QuinnConnection, QuinnTransport, TlsMaterial};

/// How long a closing connection waits for its last frames to be read.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

type SharedDriver = Arc<Mutex<ServerDriver<SystemEnv>>>;

/// Shared state for all connections.
struct SharedState {
    /// Session ID to QUIC connection, for forced closes
    connections: RwLock<HashMap<SessionId, QuinnConnection>>,
    /// Per-session outbound queues
    outbound: OutboundRegistry,
    /// Close reasons for sessions whose writer should close after draining
    closing: Mutex<HashMap<SessionId, String>>,
    /// Cleared when the accept loop stops
    healthy: AtomicBool,
    /// Driver panics caught at the event boundary
    panics: AtomicU64,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Outbound queue capacity per session, in frames
    pub outbound_capacity: usize,
    /// What to do with a recipient whose queue is full
    pub broadcast_policy: BroadcastPolicy,
    /// Interval between driver ticks
    pub tick_interval: Duration,
    /// Driver configuration (rooms, limits, grace window)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            broadcast_policy: BroadcastPolicy::default(),
            tick_interval: Duration::from_secs(1),
            driver: DriverConfig::default(),
        }
    }
}

/// Read-only view for health checks and status counters.
#[derive(Clone)]
pub struct StatsHandle {
    driver: SharedDriver,
    shared: Arc<SharedState>,
}

impl StatsHandle {
    /// Counters at this instant.
    pub async fn stats(&self) -> ServerStats {
        self.driver.lock().await.stats()
    }

    /// `true` while the server accepts connections.
    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Relaxed)
    }

    /// Driver panics caught since startup.
    pub fn panic_count(&self) -> u64 {
        self.shared.panics.load(Ordering::Relaxed)
    }
}

/// Production Parlor server.
///
/// Wraps `ServerDriver` with Quinn QUIC transport and system environment.
pub struct Server {
    /// The action-based server driver
    driver: SharedDriver,
    /// State shared with connection tasks
    shared: Arc<SharedState>,
    /// QUIC endpoint
    transport: QuinnTransport,
    /// Environment
    env: SystemEnv,
    /// Tick interval
    tick_interval: Duration,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// - `ServerError::Driver` for an invalid room configuration
    /// - `ServerError::Config` for a bad address or TLS material
    /// - `ServerError::Transport` if the socket cannot be bound
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), config.driver)?;

        let tls = TlsMaterial::from_paths(config.cert_path, config.key_path);
        let transport = QuinnTransport::bind(&config.bind_address, &tls)?;

        let shared = Arc::new(SharedState {
            connections: RwLock::new(HashMap::new()),
            outbound: OutboundRegistry::new(config.outbound_capacity, config.broadcast_policy),
            closing: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            panics: AtomicU64::new(0),
        });

        Ok(Self {
            driver: Arc::new(Mutex::new(driver)),
            shared,
            transport,
            env,
            tick_interval: config.tick_interval,
        })
    }

    /// Handle for polling health and counters while the server runs.
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle { driver: Arc::clone(&self.driver), shared: Arc::clone(&self.shared) }
    }

    /// Run the server, accepting connections and processing frames.
    ///
    /// Runs until the endpoint is closed.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the local address cannot be read
    pub async fn run(&self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        let ticker = tokio::spawn(run_ticks(
            Arc::clone(&self.driver),
            Arc::clone(&self.shared),
            self.env.clone(),
            self.tick_interval,
        ));

        loop {
            match self.transport.accept().await {
                Ok(Some(conn)) => {
                    let driver = Arc::clone(&self.driver);
                    let shared = Arc::clone(&self.shared);
                    let env = self.env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, driver, shared, env).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                },
            }
        }

        self.shared.healthy.store(false, Ordering::Relaxed);
        ticker.abort();
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Local address the server is bound to.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the socket is gone
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Stop accepting connections and close existing ones.
    pub fn shutdown(&self) {
        self.transport.shutdown("server shutting down");
    }
}

/// Handle a single QUIC connection.
async fn handle_connection(
    conn: QuinnConnection,
    driver: SharedDriver,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let session_id = loop {
        let candidate = env.random_u64();
        if !shared.connections.read().await.contains_key(&candidate) {
            break candidate;
        }
    };

    tracing::debug!(session_id, remote = %conn.remote_addr(), "New connection");

    let outbound_stream = conn
        .open_uni()
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to open outbound stream: {e}")))?;

    shared.connections.write().await.insert(session_id, conn.clone());
    let queue = shared.outbound.register(session_id).await;
    tokio::spawn(write_outbound(
        session_id,
        outbound_stream,
        queue,
        conn.clone(),
        Arc::clone(&shared),
    ));

    if let Err(e) =
        dispatch(&driver, &shared, ServerEvent::ConnectionAccepted { session_id }, None).await
    {
        shared.connections.write().await.remove(&session_id);
        shared.outbound.unregister(session_id).await;
        conn.close("session setup failed");
        return Err(e);
    }

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let driver = Arc::clone(&driver);
                let shared = Arc::clone(&shared);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(session_id, send, recv, driver, &shared).await {
                        tracing::debug!("Stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!(session_id, "Connection closed: {}", e);
                break;
            },
        }
    }

    shared.connections.write().await.remove(&session_id);
    shared.outbound.unregister(session_id).await;

    let closed = ServerEvent::ConnectionClosed { session_id, reason: "connection closed".to_string() };
    dispatch(&driver, &shared, closed, None).await
}

/// Handle one client request stream.
///
/// Frames are read back to back: a 16-byte header, then exactly
/// `payload_size` bytes. Responses go out on the session's outbound stream.
async fn handle_stream(
    session_id: SessionId,
    send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    driver: SharedDriver,
    shared: &SharedState,
) -> Result<(), ServerError> {
    drop(send);

    let mut buf = BytesMut::with_capacity(4096);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);

        if let Err(e) = recv.read_exact(&mut buf[..FrameHeader::SIZE]).await {
            tracing::debug!(session_id, "Read error: {}", e);
            break;
        }

        let payload_size = match FrameHeader::from_bytes(&buf[..FrameHeader::SIZE]) {
            Ok(header) => header.payload_size() as usize,
            Err(e) => {
                tracing::warn!(session_id, "Invalid frame header: {}", e);
                break;
            },
        };

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            if let Err(e) = recv.read_exact(&mut buf[FrameHeader::SIZE..]).await {
                tracing::debug!(session_id, "Payload read error: {}", e);
                break;
            }
        }

        let frame = match Frame::decode(&buf) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(session_id, "Frame decode error: {}", e);
                break;
            },
        };

        let event = ServerEvent::FrameReceived { session_id, frame };
        if let Err(e) = dispatch(&driver, shared, event, Some(session_id)).await {
            tracing::warn!(session_id, "Frame processing error: {}", e);
        }
    }

    Ok(())
}

/// Drain one session's queue onto its outbound stream.
///
/// Exits once the queue is unregistered. If the driver asked for the
/// connection to be closed, it is closed after the last frame is read.
async fn write_outbound(
    session_id: SessionId,
    mut stream: quinn::SendStream,
    mut queue: mpsc::Receiver<Bytes>,
    conn: QuinnConnection,
    shared: Arc<SharedState>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = stream.write_all(&frame).await {
            tracing::debug!(session_id, "Outbound write failed: {}", e);
            break;
        }
    }

    let Some(reason) = shared.closing.lock().await.remove(&session_id) else {
        return;
    };

    if stream.finish().is_ok() {
        let _ = tokio::time::timeout(CLOSE_LINGER, stream.stopped()).await;
    }
    conn.close(&reason);
}

/// Process one event under the driver lock and execute its actions.
///
/// A panic inside the driver is contained here: it is logged, counted and
/// reported to the originating session as an opaque internal error.
async fn dispatch(
    driver: &SharedDriver,
    shared: &SharedState,
    event: ServerEvent,
    origin: Option<SessionId>,
) -> Result<(), ServerError> {
    let mut driver = driver.lock().await;

    let actions = match std::panic::catch_unwind(AssertUnwindSafe(|| driver.process_event(event))) {
        Ok(result) => result?,
        Err(panic) => {
            shared.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!(session_id = ?origin, "Driver panicked: {}", panic_message(panic.as_ref()));

            let Some(session_id) = origin else {
                return Ok(());
            };
            let frame = Payload::Error(ErrorPayload::internal()).into_frame()?;
            vec![ServerAction::SendToSession { session_id, frame }]
        },
    };

    execute_actions(actions, shared).await;
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Execute server actions.
///
/// A frame that cannot be encoded is skipped; later actions still run.
async fn execute_actions<I>(actions: Vec<ServerAction<I>>, shared: &SharedState) {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                let Some(bytes) = wire_bytes(&frame) else { continue };
                let slow = shared.outbound.fan_out(&[session_id], &bytes).await;
                close_slow(shared, slow).await;
            },

            ServerAction::Broadcast { sessions, frame } => {
                let Some(bytes) = wire_bytes(&frame) else { continue };
                let slow = shared.outbound.fan_out(&sessions, &bytes).await;
                close_slow(shared, slow).await;
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!("Closing connection {}: {}", session_id, reason);
                shared.closing.lock().await.insert(session_id, reason.clone());
                if !shared.outbound.unregister(session_id).await {
                    shared.closing.lock().await.remove(&session_id);
                    if let Some(conn) = shared.connections.write().await.remove(&session_id) {
                        conn.close(&reason);
                    }
                }
            },

            ServerAction::Log { level, message, .. } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Encoded frame, or `None` (logged) if it cannot be put on the wire.
fn wire_bytes(frame: &Frame) -> Option<Bytes> {
    match frame.to_vec() {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(err) => {
            tracing::warn!(opcode = frame.header.opcode(), error = %err, "dropping unencodable frame");
            None
        },
    }
}

/// Close connections that fell behind under [`BroadcastPolicy::Disconnect`].
async fn close_slow(shared: &SharedState, slow: Vec<SessionId>) {
    if slow.is_empty() {
        return;
    }
    let mut connections = shared.connections.write().await;
    for session_id in slow {
        if let Some(conn) = connections.remove(&session_id) {
            conn.close("outbound queue overflow");
        }
    }
}

/// Periodic driver tick plus a status line.
async fn run_ticks(driver: SharedDriver, shared: Arc<SharedState>, env: SystemEnv, interval: Duration) {
    loop {
        env.sleep(interval).await;

        if let Err(e) = dispatch(&driver, &shared, ServerEvent::Tick, None).await {
            tracing::warn!("Tick failed: {}", e);
        }

        let stats = driver.lock().await.stats();
        tracing::debug!(
            connected_users = stats.connected_users,
            live_sessions = stats.live_sessions,
            active_rooms = stats.active_rooms,
            total_messages = stats.total_messages,
            "tick"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn bind_rejects_unknown_default_room() {
        let config = ServerRuntimeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            driver: DriverConfig {
                default_room: parlor_proto::RoomId::from("lobby"),
                ..Default::default()
            },
            ..Default::default()
        };

        let result = Server::bind(config);
        assert!(matches!(result, Err(ServerError::Driver(DriverError::Config(_)))));
    }

    #[tokio::test]
    async fn stats_handle_reports_idle_server() {
        let config =
            ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
        let server = Server::bind(config).unwrap();
        let handle = server.stats_handle();

        assert!(handle.is_healthy());
        assert_eq!(handle.panic_count(), 0);

        let stats = handle.stats().await;
        assert_eq!(stats.connected_users, 0);
        assert_eq!(stats.total_messages, 0);
    }

    #[tokio::test]
    async fn close_without_queue_is_harmless() {
        let shared = SharedState {
            connections: RwLock::new(HashMap::new()),
            outbound: OutboundRegistry::new(4, BroadcastPolicy::DropEvent),
            closing: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            panics: AtomicU64::new(0),
        };
        let actions: Vec<ServerAction<()>> =
            vec![ServerAction::CloseConnection { session_id: 3, reason: "bye".to_string() }];

        execute_actions(actions, &shared).await;
        assert!(shared.closing.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unencodable_frame_does_not_stop_the_batch() {
        let shared = SharedState {
            connections: RwLock::new(HashMap::new()),
            outbound: OutboundRegistry::new(4, BroadcastPolicy::DropEvent),
            closing: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            panics: AtomicU64::new(0),
        };
        let mut rx = shared.outbound.register(1).await;

        let oversized = Frame::new(
            FrameHeader::new(parlor_proto::Opcode::RoomJoined),
            vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1],
        );
        let small = Payload::RoomsList(parlor_proto::payloads::events::RoomsList { rooms: Vec::new() })
            .into_frame()
            .unwrap();
        let actions: Vec<ServerAction<()>> = vec![
            ServerAction::SendToSession { session_id: 1, frame: oversized },
            ServerAction::Broadcast { sessions: vec![1], frame: small.clone() },
        ];

        execute_actions(actions, &shared).await;

        assert_eq!(rx.recv().await.unwrap(), Bytes::from(small.to_vec().unwrap()));
        assert!(rx.try_recv().is_err());
    }
}
