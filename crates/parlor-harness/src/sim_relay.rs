//! In-process relay for deterministic tests without a network.
//!
//! `SimRelay` owns a [`ServerDriver`] over [`SimEnv`] and executes its actions
//! the way the production runtime does, except that delivery appends decoded
//! payloads to a per-session inbox. A `CloseConnection` action is fed back as
//! `ConnectionClosed`, as the runtime does once the transport drops.

use std::collections::{HashMap, VecDeque};

use parlor_core::SessionId;
use parlor_proto::{Frame, Payload, ProtocolError};
use parlor_server::{DriverConfig, DriverError, LogLevel, ServerAction, ServerDriver, ServerEvent};

use crate::SimEnv;

/// Error from a relay operation.
#[derive(Debug)]
pub enum SimRelayError {
    /// The driver rejected the event
    Driver(DriverError),
    /// An emitted frame did not decode
    Protocol(ProtocolError),
}

impl std::fmt::Display for SimRelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(e) => write!(f, "driver: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
        }
    }
}

impl std::error::Error for SimRelayError {}

impl From<DriverError> for SimRelayError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<ProtocolError> for SimRelayError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

/// A payload as received by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Echoed request id, 0 for pushed events
    pub request_id: u32,
    /// Decoded payload
    pub payload: Payload,
}

/// Driver plus per-session inboxes.
pub struct SimRelay {
    driver: ServerDriver<SimEnv>,
    env: SimEnv,
    inboxes: HashMap<SessionId, VecDeque<Delivery>>,
    closed: Vec<(SessionId, String)>,
    next_session_id: SessionId,
}

impl SimRelay {
    /// Relay with the default configuration.
    ///
    /// # Errors
    ///
    /// - `SimRelayError::Driver` never for the default rooms
    pub fn new(env: SimEnv) -> Result<Self, SimRelayError> {
        Self::with_config(env, DriverConfig::default())
    }

    /// Relay with a custom configuration.
    ///
    /// # Errors
    ///
    /// - `SimRelayError::Driver` for an invalid room configuration
    pub fn with_config(env: SimEnv, config: DriverConfig) -> Result<Self, SimRelayError> {
        let driver = ServerDriver::new(env.clone(), config)?;
        Ok(Self {
            driver,
            env,
            inboxes: HashMap::new(),
            closed: Vec::new(),
            next_session_id: 1,
        })
    }

    /// Open a connection and return its session id.
    ///
    /// # Errors
    ///
    /// - Any error from the driver or decoding its output
    pub fn open(&mut self) -> Result<SessionId, SimRelayError> {
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        self.inboxes.insert(session_id, VecDeque::new());
        self.process(ServerEvent::ConnectionAccepted { session_id })?;
        Ok(session_id)
    }

    /// Deliver a client request.
    ///
    /// # Errors
    ///
    /// - `SimRelayError::Protocol` if the payload cannot be encoded
    /// - Any error from the driver
    pub fn request(
        &mut self,
        session_id: SessionId,
        payload: Payload,
        request_id: u32,
    ) -> Result<(), SimRelayError> {
        let frame = payload.into_reply(request_id)?;
        self.send_frame(session_id, frame)
    }

    /// Deliver a raw frame, well-formed or not.
    ///
    /// # Errors
    ///
    /// - Any error from the driver or decoding its output
    pub fn send_frame(&mut self, session_id: SessionId, frame: Frame) -> Result<(), SimRelayError> {
        self.process(ServerEvent::FrameReceived { session_id, frame })
    }

    /// Drop a connection from the transport side.
    ///
    /// # Errors
    ///
    /// - Any error from the driver or decoding its output
    pub fn drop_connection(&mut self, session_id: SessionId) -> Result<(), SimRelayError> {
        self.process(ServerEvent::ConnectionClosed {
            session_id,
            reason: "transport lost".to_string(),
        })
    }

    /// Advance virtual time and run one tick.
    ///
    /// # Errors
    ///
    /// - Any error from the driver or decoding its output
    pub fn advance(&mut self, by: std::time::Duration) -> Result<(), SimRelayError> {
        self.env.advance(by);
        self.process(ServerEvent::Tick)
    }

    /// Process one event and execute the resulting actions.
    ///
    /// # Errors
    ///
    /// - Any error from the driver or decoding its output
    pub fn process(&mut self, event: ServerEvent) -> Result<(), SimRelayError> {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            for action in self.driver.process_event(event)? {
                match action {
                    ServerAction::SendToSession { session_id, frame } => {
                        self.deliver(&[session_id], &frame)?;
                    },
                    ServerAction::Broadcast { sessions, frame } => {
                        self.deliver(&sessions, &frame)?;
                    },
                    ServerAction::CloseConnection { session_id, reason } => {
                        self.closed.push((session_id, reason.clone()));
                        pending.push_back(ServerEvent::ConnectionClosed { session_id, reason });
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

        Ok(())
    }

    fn deliver(&mut self, sessions: &[SessionId], frame: &Frame) -> Result<(), SimRelayError> {
        let delivery =
            Delivery { request_id: frame.header.request_id(), payload: Payload::from_frame(frame)? };
        for session_id in sessions {
            if let Some(inbox) = self.inboxes.get_mut(session_id) {
                inbox.push_back(delivery.clone());
            }
        }
        Ok(())
    }

    /// Drain a session's inbox.
    pub fn take(&mut self, session_id: SessionId) -> Vec<Delivery> {
        self.inboxes.get_mut(&session_id).map(|inbox| inbox.drain(..).collect()).unwrap_or_default()
    }

    /// Drain a session's inbox, payloads only.
    pub fn take_payloads(&mut self, session_id: SessionId) -> Vec<Payload> {
        self.take(session_id).into_iter().map(|d| d.payload).collect()
    }

    /// Drain every inbox.
    pub fn clear_inboxes(&mut self) {
        for inbox in self.inboxes.values_mut() {
            inbox.clear();
        }
    }

    /// Connections the driver asked to close, with reasons, oldest first.
    pub fn closed(&self) -> &[(SessionId, String)] {
        &self.closed
    }

    /// Underlying driver for assertions.
    pub fn driver(&self) -> &ServerDriver<SimEnv> {
        &self.driver
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }
}
