//! Simulation server wrapper for testing with turmoil.
//!
//! `SimServer` wraps [`ServerDriver`] for integration with turmoil's
//! deterministic simulation. It uses [`SimEnv`] for the action-based core,
//! turmoil TCP for networking, and tracks connection halves in a `HashMap`.
//! Frames travel over the byte stream exactly as encoded: 16-byte header,
//! then payload.

use std::{
    collections::{HashMap, VecDeque},
    io::{self, ErrorKind},
};

use parlor_core::SessionId;
use parlor_proto::{Frame, FrameHeader, Payload};
use parlor_server::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use turmoil::net::{TcpListener, TcpStream};

use crate::{SimEnv, sim_env::SimInstant};

/// Read one frame from a byte stream.
///
/// # Errors
///
/// - `ErrorKind::UnexpectedEof` if the stream ends mid-frame
/// - `ErrorKind::InvalidData` for a malformed header or payload
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let mut buf = vec![0u8; FrameHeader::SIZE];
    reader.read_exact(&mut buf).await?;

    let payload_size = FrameHeader::from_bytes(&buf)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?
        .payload_size() as usize;

    buf.resize(FrameHeader::SIZE + payload_size, 0);
    reader.read_exact(&mut buf[FrameHeader::SIZE..]).await?;

    Frame::decode(&buf).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

fn encode_frame(frame: &Frame) -> io::Result<Vec<u8>> {
    frame.to_vec().map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

/// Connection state for a simulated connection.
struct SimConnection {
    reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
}

/// Simulation server for testing with turmoil.
///
/// Wraps `ServerDriver` and handles the async I/O layer using turmoil's
/// deterministic TCP implementation.
///
/// This server is designed for test-driven usage where tests explicitly
/// drive the server (accept, read one frame, tick) rather than having it run
/// autonomously.
pub struct SimServer {
    /// The action-based server driver
    driver: ServerDriver<SimEnv>,
    /// TCP listener for accepting connections
    listener: TcpListener,
    /// Connection halves (`session_id` → connection)
    connections: HashMap<SessionId, SimConnection>,
    /// Next connection ID
    next_session_id: SessionId,
}

impl SimServer {
    /// Create and bind a new simulation server.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Self::bind_with_config(address, SimEnv::new(), DriverConfig::default()).await
    }

    /// Create and bind a new simulation server with a custom environment
    /// and config.
    pub async fn bind_with_config(
        address: &str,
        env: SimEnv,
        config: DriverConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let driver = ServerDriver::new(env, config).map_err(|e| io::Error::other(e.to_string()))?;

        Ok(Self { driver, listener, connections: HashMap::new(), next_session_id: 1 })
    }

    /// Accept a new connection and return its ID.
    ///
    /// This method blocks until a connection is available.
    pub async fn accept_connection(&mut self) -> io::Result<SessionId> {
        let (stream, _addr) = self.listener.accept().await?;

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let (reader, writer) = tokio::io::split(stream);
        self.connections.insert(session_id, SimConnection { reader, writer });

        self.process(ServerEvent::ConnectionAccepted { session_id }).await?;
        Ok(session_id)
    }

    /// Read one frame from a connection and process it.
    ///
    /// A connection whose peer hung up is reported to the driver as closed.
    /// Returns `false` in that case.
    pub async fn serve_one(&mut self, session_id: SessionId) -> io::Result<bool> {
        let Some(conn) = self.connections.get_mut(&session_id) else {
            return Err(io::Error::new(ErrorKind::NotConnected, format!("no session {session_id}")));
        };

        match read_frame(&mut conn.reader).await {
            Ok(frame) => {
                self.process_frame(session_id, frame).await?;
                Ok(true)
            },
            Err(e) if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset) => {
                self.connections.remove(&session_id);
                self.process(ServerEvent::ConnectionClosed {
                    session_id,
                    reason: "peer closed".to_string(),
                })
                .await?;
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    /// Process a received frame from a connection.
    ///
    /// Call this when a frame is read from the connection.
    pub async fn process_frame(&mut self, session_id: SessionId, frame: Frame) -> io::Result<()> {
        self.process(ServerEvent::FrameReceived { session_id, frame }).await
    }

    /// Process a tick event for timeout handling.
    pub async fn tick(&mut self) -> io::Result<()> {
        self.process(ServerEvent::Tick).await
    }

    /// Process one event and execute the resulting actions.
    ///
    /// Closes requested by the driver are fed back as `ConnectionClosed`.
    async fn process(&mut self, event: ServerEvent) -> io::Result<()> {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let actions =
                self.driver.process_event(event).map_err(|e| io::Error::other(e.to_string()))?;
            pending.extend(self.execute_actions(actions).await?);
        }
        Ok(())
    }

    /// Execute server actions, returning follow-up events.
    async fn execute_actions(
        &mut self,
        actions: Vec<ServerAction<SimInstant>>,
    ) -> io::Result<Vec<ServerEvent>> {
        let mut follow_up = Vec::new();

        for action in actions {
            match action {
                ServerAction::SendToSession { session_id, frame } => {
                    self.send_frame(session_id, &frame).await?;
                },

                ServerAction::Broadcast { sessions, frame } => {
                    for session_id in sessions {
                        self.send_frame(session_id, &frame).await?;
                    }
                },

                ServerAction::CloseConnection { session_id, reason } => {
                    if let Some(mut conn) = self.connections.remove(&session_id) {
                        let _ = conn.writer.shutdown().await;
                    }
                    follow_up.push(ServerEvent::ConnectionClosed { session_id, reason });
                },

                ServerAction::Log { level, message, .. } => {
                    self.log(level, &message);
                },
            }
        }

        Ok(follow_up)
    }

    /// Send a frame to a specific session.
    ///
    /// Write failures are logged, not returned: the peer is gone and the
    /// read side reports the close.
    async fn send_frame(&mut self, session_id: SessionId, frame: &Frame) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(&session_id) else {
            return Ok(());
        };
        let buf = encode_frame(frame)?;
        let written = match conn.writer.write_all(&buf).await {
            Ok(()) => conn.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!(session_id, error = %e, "dropping frame for unreachable peer");
        }
        Ok(())
    }

    /// Log a message.
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.driver.connection_count()
    }

    /// Underlying driver for test assertions.
    pub fn driver(&self) -> &ServerDriver<SimEnv> {
        &self.driver
    }
}

/// Client side of a simulated connection.
pub struct SimClient {
    stream: TcpStream,
    next_request_id: u32,
}

impl SimClient {
    /// Connect to a simulated server.
    pub async fn connect(address: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self { stream, next_request_id: 1 })
    }

    /// Send a request and return the request id it carries.
    pub async fn send(&mut self, payload: Payload) -> io::Result<u32> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let frame = payload
            .into_reply(request_id)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        self.stream.write_all(&encode_frame(&frame)?).await?;
        self.stream.flush().await?;
        Ok(request_id)
    }

    /// Receive the next frame, decoded, with its request id.
    pub async fn recv(&mut self) -> io::Result<(u32, Payload)> {
        let frame = read_frame(&mut self.stream).await?;
        let payload =
            Payload::from_frame(&frame).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        Ok((frame.header.request_id(), payload))
    }

    /// Receive frames until one satisfies `pred`, returning it.
    pub async fn recv_until(
        &mut self,
        mut pred: impl FnMut(&Payload) -> bool,
    ) -> io::Result<(u32, Payload)> {
        loop {
            let (request_id, payload) = self.recv().await?;
            if pred(&payload) {
                return Ok((request_id, payload));
            }
        }
    }

    /// Close the write side, signalling end of stream to the server.
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
