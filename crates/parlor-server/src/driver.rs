//! Server driver.
//!
//! Owns every engine store (sessions, presence, rooms, message log, typing
//! state) and is the single serialization point for mutations. The runtime
//! feeds it [`ServerEvent`]s one at a time; each call validates, mutates and
//! returns the [`ServerAction`]s that describe the resulting deliveries.
//! Recipients are resolved at mutation time, so the actions of one event
//! reflect exactly the state that event produced.
//!
//! # Error boundary
//!
//! Client-caused failures ([`EngineError`]) never escape `process_event`:
//! they become an `error` event for the originating connection, echoing the
//! request id, and leave every store unchanged. [`DriverError`] is reserved
//! for runtime misuse and encoding failures.

use std::{collections::HashMap, time::Duration};

use parlor_core::{
    Audience, EngineError, Environment, IdentityResolver, MessageLog, NewMessage,
    PresenceDirectory, RegisterOutcome, RoomRegistry, RoomSpec, Session, SessionError,
    SessionId, SessionState, TypingTracker, User, resolve, session::DEFAULT_HANDSHAKE_TIMEOUT,
};
use parlor_proto::{
    ErrorPayload, Frame, MessageId, Payload, RoomId, UserId,
    payloads::{
        events::{
            MessageRead, MessageReacted, NewMessage as NewMessageEvent, Notification,
            PresenceChanged, PrivateMessageDelivered, RoomJoined, RoomMembershipChanged,
            RoomsList, TypingChanged, UsersList,
        },
        records::PrivateMessageRecord,
        requests::{
            JoinRoom, MarkMessageRead, ReactToMessage, SendMessage, SendPrivateMessage,
            TypingSignal,
        },
        session::{Goodbye, Hello},
    },
};
use serde::Serialize;

use crate::server_error::DriverError;

/// Records of disconnected users are kept this long by default.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(120);

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// How a second connection for an already-connected identity is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateLoginPolicy {
    /// Newest connection wins; the stale one is closed.
    #[default]
    TakeOver,
    /// The new connection is refused and closed.
    Reject,
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Rooms provisioned at startup, in listing order
    pub rooms: Vec<RoomSpec>,
    /// Room new identities are placed in
    pub default_room: RoomId,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Time allowed between connecting and `Hello`
    pub handshake_timeout: Duration,
    /// How long disconnected users stay known; `None` keeps them forever
    pub grace_window: Option<Duration>,
    /// Duplicate login handling
    pub duplicate_login: DuplicateLoginPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rooms: RoomSpec::defaults(),
            default_room: RoomId::from("general"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            grace_window: Some(DEFAULT_GRACE_WINDOW),
            duplicate_login: DuplicateLoginPolicy::default(),
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        session_id: SessionId,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Connection that sent the frame
        session_id: SessionId,
        /// The received frame
        frame: Frame,
    },

    /// A connection was closed (by peer, error, or a `CloseConnection`)
    ConnectionClosed {
        /// Connection that was closed
        session_id: SessionId,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick for handshake timeouts and presence expiry
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction<I> {
    /// Send a frame to one session
    SendToSession {
        /// Target session
        session_id: SessionId,
        /// Frame to send
        frame: Frame,
    },

    /// Send the same frame to several sessions
    Broadcast {
        /// Recipients, each exactly once
        sessions: Vec<SessionId>,
        /// Frame to send
        frame: Frame,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: SessionId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred
        timestamp: I,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Status counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Users currently connected
    pub connected_users: usize,
    /// Users known to presence, online or within the grace window
    pub known_users: usize,
    /// Open connections, including ones still handshaking
    pub live_sessions: usize,
    /// Rooms with at least one member
    pub active_rooms: usize,
    /// Messages across all room logs
    pub total_messages: usize,
    /// Time since the driver was created
    pub uptime: Duration,
}

/// Accumulates the actions of one event.
struct Outbox<I> {
    actions: Vec<ServerAction<I>>,
    now: I,
}

impl<I: Copy> Outbox<I> {
    fn new(now: I) -> Self {
        Self { actions: Vec::new(), now }
    }

    /// Queue a frame for one session. A payload that cannot be encoded is
    /// logged and dropped; the rest of the batch still goes out.
    fn reply(&mut self, session_id: SessionId, payload: Payload, request_id: u32) {
        if let Some(frame) = self.encode(payload, request_id) {
            self.actions.push(ServerAction::SendToSession { session_id, frame });
        }
    }

    fn broadcast(&mut self, sessions: Vec<SessionId>, payload: Payload) {
        if sessions.is_empty() {
            return;
        }
        if let Some(frame) = self.encode(payload, 0) {
            self.actions.push(ServerAction::Broadcast { sessions, frame });
        }
    }

    fn encode(&mut self, payload: Payload, request_id: u32) -> Option<Frame> {
        let opcode = payload.opcode();
        match payload.into_reply(request_id) {
            Ok(frame) => Some(frame),
            Err(err) => {
                self.log(LogLevel::Warn, format!("dropping unencodable {opcode:?}: {err}"));
                None
            },
        }
    }

    fn close(&mut self, session_id: SessionId, reason: impl Into<String>) {
        self.actions.push(ServerAction::CloseConnection { session_id, reason: reason.into() });
    }

    fn log(&mut self, level: LogLevel, message: String) {
        self.actions.push(ServerAction::Log { level, message, timestamp: self.now });
    }
}

/// Action-based server driver.
///
/// Orchestrates the connection lifecycle and every room operation.
pub struct ServerDriver<E>
where
    E: Environment,
{
    /// Connection state machines
    sessions: HashMap<SessionId, Session<E::Instant>>,
    /// Who is online
    presence: PresenceDirectory<E::Instant>,
    /// Configured rooms and membership
    rooms: RoomRegistry,
    /// Per-room message history
    log: MessageLog,
    /// Typing indicators
    typing: TypingTracker,
    /// Credential → identity
    identity: IdentityResolver,
    /// Environment (time, RNG)
    env: E,
    /// Server configuration
    config: DriverConfig,
    /// Creation time, for uptime
    started_at: E::Instant,
}

impl<E> ServerDriver<E>
where
    E: Environment,
{
    /// Create a driver with the configured rooms.
    ///
    /// # Errors
    ///
    /// - `DriverError::Config` for an empty or duplicate room list, or a
    ///   default room that is not configured
    pub fn new(env: E, config: DriverConfig) -> Result<Self, DriverError> {
        let rooms = RoomRegistry::new(config.rooms.iter().cloned())?;
        if !rooms.contains(&config.default_room) {
            return Err(DriverError::Config(format!(
                "default room '{}' is not configured",
                config.default_room
            )));
        }

        let log = MessageLog::new(rooms.list_rooms().map(|room| room.id()));
        let started_at = env.now();

        Ok(Self {
            sessions: HashMap::new(),
            presence: PresenceDirectory::new(),
            rooms,
            log,
            typing: TypingTracker::new(),
            identity: IdentityResolver::new(),
            env,
            config,
            started_at,
        })
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    ///
    /// # Errors
    ///
    /// - `DriverError::SessionNotFound` for a frame from an unknown session
    /// - `DriverError::SessionAlreadyExists` for a repeated session id
    /// - `DriverError::Protocol` if an error reply cannot be encoded
    pub fn process_event(
        &mut self,
        event: ServerEvent,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, &frame)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                self.handle_connection_closed(session_id, &reason)
            },
            ServerEvent::Tick => self.handle_tick(),
        }
    }

    fn handle_connection_accepted(
        &mut self,
        session_id: SessionId,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        let now = self.env.now();
        let mut out = Outbox::new(now);

        if self.sessions.contains_key(&session_id) {
            return Err(DriverError::SessionAlreadyExists(session_id));
        }

        if self.sessions.len() >= self.config.max_connections {
            out.close(session_id, "max connections exceeded");
            out.log(LogLevel::Warn, format!("connection {session_id} refused: at capacity"));
            return Ok(out.actions);
        }

        self.sessions.insert(session_id, Session::new(session_id, now));
        out.log(LogLevel::Debug, format!("connection {session_id} accepted"));

        Ok(out.actions)
    }

    fn handle_frame_received(
        &mut self,
        session_id: SessionId,
        frame: &Frame,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        let mut out = Outbox::new(self.env.now());
        let request_id = frame.header.request_id();

        if let Err(err) = self.dispatch(session_id, frame, request_id, &mut out) {
            let level = match err {
                EngineError::Internal(_) => LogLevel::Error,
                _ => LogLevel::Debug,
            };
            out.log(
                level,
                format!(
                    "session {session_id} request {:#06x} failed: {err}",
                    frame.header.opcode()
                ),
            );

            let payload = err.to_payload();
            let code = payload.code;
            let reply = Payload::Error(payload).into_reply(request_id).or_else(|_| {
                // Message echoed too much client input; the code alone still fits.
                Payload::Error(ErrorPayload { code, message: String::new() }).into_reply(request_id)
            })?;
            out.actions.push(ServerAction::SendToSession { session_id, frame: reply });
        }

        Ok(out.actions)
    }

    fn dispatch(
        &mut self,
        session_id: SessionId,
        frame: &Frame,
        request_id: u32,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        match Payload::from_frame(frame)? {
            Payload::Hello(hello) => self.handle_hello(session_id, hello, request_id, out),
            Payload::Goodbye(goodbye) => {
                self.handle_goodbye(session_id, &goodbye, out);
                Ok(())
            },
            Payload::JoinRoom(req) => self.handle_join_room(session_id, req, request_id, out),
            Payload::SendMessage(req) => self.handle_send_message(session_id, req, out),
            Payload::TypingStart(req) => self.handle_typing(session_id, req, true, out),
            Payload::TypingStop(req) => self.handle_typing(session_id, req, false, out),
            Payload::ReactToMessage(req) => self.handle_react(session_id, req, out),
            Payload::MarkMessageRead(req) => self.handle_mark_read(session_id, req, out),
            Payload::SendPrivateMessage(req) => {
                self.handle_private_message(session_id, req, request_id, out)
            },
            other => Err(EngineError::MalformedRequest(format!(
                "{:?} is not a client request",
                other.opcode()
            ))),
        }
    }

    /// `Connecting → Authenticated → Active(room)`.
    fn handle_hello(
        &mut self,
        session_id: SessionId,
        hello: Hello,
        request_id: u32,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let state = self.session(session_id)?.state();
        if state != SessionState::Connecting {
            return Err(SessionError::InvalidTransition { state, operation: "hello" }.into());
        }

        let (identity, source) = self.identity.resolve(hello.credential.as_deref(), &self.env);
        let user_id = identity.user_id.clone();

        if let Some(previous) = self.presence.connection_of(&user_id) {
            match self.config.duplicate_login {
                DuplicateLoginPolicy::Reject => {
                    self.session_mut(session_id)?.close();
                    let error = ErrorPayload::malformed(format!("user {user_id} is already connected"));
                    out.reply(session_id, Payload::Error(error), request_id);
                    out.close(session_id, "duplicate login rejected");
                    out.log(
                        LogLevel::Info,
                        format!("session {session_id} refused: {user_id} already on {previous}"),
                    );
                    return Ok(());
                },
                DuplicateLoginPolicy::TakeOver => {
                    if let Some(stale) = self.sessions.get_mut(&previous) {
                        stale.supersede();
                    }
                    self.clear_typing(&user_id, out)?;
                    out.close(previous, "superseded by a newer connection");
                },
            }
        }

        let target = self.reentry_room(&user_id);
        let now = out.now;
        let now_ms = self.env.wall_clock_millis();

        self.session_mut(session_id)?.authenticate(user_id.clone())?;
        let (_, outcome) = self.presence.register(identity, session_id, now, now_ms);
        let joined = self.rooms.join(&user_id, &target)?;
        self.presence.set_current_room(&user_id, Some(target.clone()));
        self.session_mut(session_id)?.activate(target.clone())?;

        let users = self.presence.connected_users().map(User::summary).collect();
        out.reply(session_id, Payload::UsersList(UsersList { users }), 0);
        out.reply(session_id, Payload::RoomsList(self.rooms_list()), 0);
        self.send_room_joined(session_id, &target, request_id, out)?;

        let summary = self.user(&user_id)?.summary();
        let username = summary.username.clone();
        let presence_event = PresenceChanged { user: summary };
        let presence_event = match outcome {
            RegisterOutcome::Joined => Payload::UserConnected(presence_event),
            RegisterOutcome::Reconnected | RegisterOutcome::Superseded { .. } => {
                Payload::UserReconnected(presence_event)
            },
        };
        let everyone = self.audience(&Audience::Everyone { except: Some(user_id.clone()) })?;
        out.broadcast(everyone, presence_event);

        if !joined.already_member {
            let others = self.audience(&Audience::room_except(target.clone(), user_id.clone()))?;
            out.broadcast(
                others,
                Payload::UserJoinedRoom(RoomMembershipChanged {
                    room_id: target.clone(),
                    user_id: user_id.clone(),
                    username,
                }),
            );
        }

        out.log(
            LogLevel::Info,
            format!("session {session_id} active as {user_id} in {target} ({source:?}, {outcome:?})"),
        );
        Ok(())
    }

    fn handle_goodbye(&mut self, session_id: SessionId, goodbye: &Goodbye, out: &mut Outbox<E::Instant>) {
        let reason = format!("goodbye: {}", goodbye.reason);
        self.close_session(session_id, &reason, out);
        out.close(session_id, reason);
    }

    /// `Active(r) → Active(r')`.
    fn handle_join_room(
        &mut self,
        session_id: SessionId,
        req: JoinRoom,
        request_id: u32,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let user_id = self.session(session_id)?.require_active("join_room")?.clone();
        let room_id = req.room_id;
        if !self.rooms.contains(&room_id) {
            return Err(EngineError::RoomNotFound(room_id));
        }
        let username = self.user(&user_id)?.username().to_owned();

        let joined = self.rooms.join(&user_id, &room_id)?;

        if !joined.already_member {
            self.session_mut(session_id)?.switch_room(room_id.clone())?;
            self.presence.set_current_room(&user_id, Some(room_id.clone()));

            if let Some(previous) = joined.previous {
                if self.typing.stop(&previous, &user_id) {
                    self.broadcast_typing(&previous, &user_id, &username, false, out)?;
                }
                let others = self.audience(&Audience::room_except(previous.clone(), user_id.clone()))?;
                out.broadcast(
                    others,
                    Payload::UserLeftRoom(RoomMembershipChanged {
                        room_id: previous,
                        user_id: user_id.clone(),
                        username: username.clone(),
                    }),
                );
            }
        }

        self.send_room_joined(session_id, &room_id, request_id, out)?;

        if !joined.already_member {
            let others = self.audience(&Audience::room_except(room_id.clone(), user_id.clone()))?;
            out.broadcast(
                others,
                Payload::UserJoinedRoom(RoomMembershipChanged { room_id, user_id, username }),
            );
        }
        Ok(())
    }

    fn handle_send_message(
        &mut self,
        session_id: SessionId,
        req: SendMessage,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let user_id = self.session(session_id)?.require_active("send_message")?.clone();
        let username = self.user(&user_id)?.username().to_owned();

        let message = NewMessage {
            message_id: MessageId::from_u128(self.env.random_u128()),
            author_id: user_id.clone(),
            author_name: username.clone(),
            content: req.content,
            kind: req.kind,
        };
        let now_ms = self.env.wall_clock_millis();
        let record = self.log.append(&req.room_id, message, now_ms)?.clone();

        let room_id = req.room_id;
        let members = self.audience(&Audience::room_with_echo(room_id.clone(), user_id.clone()))?;
        out.broadcast(members, Payload::NewMessage(NewMessageEvent { message: record }));

        let others = self.audience(&Audience::room_except(room_id.clone(), user_id.clone()))?;
        out.broadcast(
            others,
            Payload::Notification(Notification {
                kind: "new_message".to_string(),
                room_id,
                message: format!("{username} sent a message"),
                from: username,
            }),
        );
        Ok(())
    }

    fn handle_typing(
        &mut self,
        session_id: SessionId,
        req: TypingSignal,
        typing: bool,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let user_id = self.session(session_id)?.require_active("typing")?.clone();
        if !self.rooms.contains(&req.room_id) {
            out.log(LogLevel::Debug, format!("typing signal from {user_id} for unknown room {}", req.room_id));
            return Ok(());
        }
        let username = self.user(&user_id)?.username().to_owned();

        if typing {
            self.typing.start(&req.room_id, &user_id);
        } else {
            self.typing.stop(&req.room_id, &user_id);
        }
        self.broadcast_typing(&req.room_id, &user_id, &username, typing, out)
    }

    fn handle_react(
        &mut self,
        session_id: SessionId,
        req: ReactToMessage,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let user_id = self.session(session_id)?.require_active("react_to_message")?.clone();
        if req.reaction.trim().is_empty() {
            return Err(EngineError::MalformedRequest("reaction must not be empty".to_string()));
        }

        let reactions =
            self.log.react(&req.message_id, &req.room_id, &user_id, &req.reaction)?.reactions.clone();

        let members = self.audience(&Audience::room_with_echo(req.room_id.clone(), user_id.clone()))?;
        out.broadcast(
            members,
            Payload::MessageReacted(MessageReacted {
                message_id: req.message_id,
                room_id: req.room_id,
                user_id,
                reaction: req.reaction,
                reactions,
            }),
        );
        Ok(())
    }

    fn handle_mark_read(
        &mut self,
        session_id: SessionId,
        req: MarkMessageRead,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let user_id = self.session(session_id)?.require_active("mark_message_read")?.clone();
        let (_, newly_read) = self.log.mark_read(&req.message_id, &req.room_id, &user_id)?;
        if !newly_read {
            out.log(LogLevel::Debug, format!("{user_id} re-read {}", req.message_id));
        }

        let others = self.audience(&Audience::room_except(req.room_id.clone(), user_id.clone()))?;
        out.broadcast(
            others,
            Payload::MessageRead(MessageRead {
                message_id: req.message_id,
                room_id: req.room_id,
                user_id,
            }),
        );
        Ok(())
    }

    fn handle_private_message(
        &mut self,
        session_id: SessionId,
        req: SendPrivateMessage,
        request_id: u32,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let user_id = self.session(session_id)?.require_active("send_private_message")?.clone();
        let username = self.user(&user_id)?.username().to_owned();
        let recipients = self.audience(&Audience::User(req.to_user_id.clone()))?;

        let message = PrivateMessageRecord {
            message_id: MessageId::from_u128(self.env.random_u128()),
            from_user_id: user_id,
            from_username: username,
            to_user_id: req.to_user_id,
            content: req.content,
            sent_at_ms: self.env.wall_clock_millis(),
        };

        out.broadcast(
            recipients,
            Payload::PrivateMessage(PrivateMessageDelivered { message: message.clone() }),
        );
        out.reply(
            session_id,
            Payload::PrivateMessageSent(PrivateMessageDelivered { message }),
            request_id,
        );
        Ok(())
    }

    fn handle_connection_closed(
        &mut self,
        session_id: SessionId,
        reason: &str,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        let mut out = Outbox::new(self.env.now());
        if self.sessions.contains_key(&session_id) {
            self.close_session(session_id, reason, &mut out);
        } else {
            out.log(LogLevel::Debug, format!("connection {session_id} closed before registration: {reason}"));
        }
        Ok(out.actions)
    }

    /// Handshake timeouts and grace-window expiry.
    fn handle_tick(&mut self) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        let now = self.env.now();
        let mut out = Outbox::new(now);
        let timeout = self.config.handshake_timeout;

        let mut expired: Vec<_> = self
            .sessions
            .values_mut()
            .filter_map(|session| {
                let elapsed = session.check_handshake_timeout(now, timeout)?;
                session.close();
                Some((session.id(), elapsed))
            })
            .collect();
        expired.sort_unstable_by_key(|(id, _)| *id);

        for (session_id, elapsed) in expired {
            out.close(session_id, format!("handshake timeout after {elapsed:?}"));
            out.log(LogLevel::Info, format!("session {session_id} never sent hello"));
        }

        if let Some(grace) = self.config.grace_window {
            let evicted = self.presence.expire_disconnected(now, grace);
            if !evicted.is_empty() {
                out.log(
                    LogLevel::Debug,
                    format!("forgot {} users after {grace:?} offline", evicted.len()),
                );
            }
        }

        Ok(out.actions)
    }

    /// Remove a session. An active one takes its user offline.
    fn close_session(&mut self, session_id: SessionId, reason: &str, out: &mut Outbox<E::Instant>) {
        let Some(mut session) = self.sessions.remove(&session_id) else {
            return;
        };
        let user_id = session.user_id().cloned();

        if session.close() != SessionState::Disconnected {
            out.log(LogLevel::Debug, format!("session {session_id} terminated: {reason}"));
            return;
        }
        let Some(user_id) = user_id else {
            return;
        };

        if let Err(err) = self.disconnect_user(&user_id, out) {
            out.log(LogLevel::Error, format!("disconnect cleanup for {user_id} failed: {err}"));
        }
        out.log(LogLevel::Info, format!("session {session_id} ({user_id}) disconnected: {reason}"));
    }

    /// `Active → Disconnected`: offline, out of every room, typing cleared.
    fn disconnect_user(&mut self, user_id: &UserId, out: &mut Outbox<E::Instant>) -> Result<(), EngineError> {
        let now = out.now;
        let now_ms = self.env.wall_clock_millis();

        self.clear_typing(user_id, out)?;
        self.presence.mark_disconnected(user_id, now, now_ms);
        self.rooms.leave_all(user_id);

        let summary = self.user(user_id)?.summary();
        let everyone = self.audience(&Audience::Everyone { except: Some(user_id.clone()) })?;
        out.broadcast(everyone, Payload::UserDisconnected(PresenceChanged { user: summary }));
        Ok(())
    }

    fn clear_typing(&mut self, user_id: &UserId, out: &mut Outbox<E::Instant>) -> Result<(), EngineError> {
        let rooms = self.typing.clear_user(user_id);
        if rooms.is_empty() {
            return Ok(());
        }
        let username = self.user(user_id)?.username().to_owned();
        for room_id in rooms {
            self.broadcast_typing(&room_id, user_id, &username, false, out)?;
        }
        Ok(())
    }

    fn broadcast_typing(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        username: &str,
        typing: bool,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let others = self.audience(&Audience::room_except(room_id.clone(), user_id.clone()))?;
        let event = TypingChanged {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            username: username.to_owned(),
        };
        let payload =
            if typing { Payload::UserTyping(event) } else { Payload::UserStopTyping(event) };
        out.broadcast(others, payload);
        Ok(())
    }

    /// Room a (re)connecting identity lands in.
    ///
    /// A takeover keeps the current room, a reconnect restores the room held
    /// at disconnect, everyone else starts in the default room.
    fn reentry_room(&self, user_id: &UserId) -> RoomId {
        let remembered = self.presence.user(user_id).and_then(|user| {
            if user.connected() { self.rooms.room_of(user_id) } else { user.last_room() }
        });
        remembered
            .filter(|room_id| self.rooms.contains(room_id))
            .cloned()
            .unwrap_or_else(|| self.config.default_room.clone())
    }

    fn rooms_list(&self) -> RoomsList {
        RoomsList { rooms: self.rooms.list_rooms().map(|room| room.summary()).collect() }
    }

    /// `room_joined` with the full log, split over as many frames as needed.
    fn send_room_joined(
        &self,
        session_id: SessionId,
        room_id: &RoomId,
        request_id: u32,
        out: &mut Outbox<E::Instant>,
    ) -> Result<(), EngineError> {
        let room = self.rooms.get(room_id).ok_or_else(|| EngineError::RoomNotFound(room_id.clone()))?;
        let history = self.log.history(room_id).map_err(EngineError::from)?.to_vec();
        let parts = RoomJoined::split(room.summary(), history)
            .map_err(|e| EngineError::Internal(format!("failed to split history of {room_id}: {e}")))?;
        for part in parts {
            out.reply(session_id, Payload::RoomJoined(part), request_id);
        }
        Ok(())
    }

    fn audience(&self, audience: &Audience) -> Result<Vec<SessionId>, EngineError> {
        resolve(audience, &self.presence, &self.rooms)
    }

    fn session(&self, session_id: SessionId) -> Result<&Session<E::Instant>, EngineError> {
        self.sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::Internal(format!("session {session_id} vanished")))
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut Session<E::Instant>, EngineError> {
        self.sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::Internal(format!("session {session_id} vanished")))
    }

    fn user(&self, user_id: &UserId) -> Result<&User<E::Instant>, EngineError> {
        self.presence
            .user(user_id)
            .ok_or_else(|| EngineError::Internal(format!("no presence record for {user_id}")))
    }

    /// Status counters.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connected_users: self.presence.connected_count(),
            known_users: self.presence.len(),
            live_sessions: self.sessions.len(),
            active_rooms: self.rooms.active_room_count(),
            total_messages: self.log.total_messages(),
            uptime: self.env.now() - self.started_at,
        }
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Lifecycle state of a connection. `None` once closed.
    pub fn session_state(&self, session_id: SessionId) -> Option<SessionState> {
        self.sessions.get(&session_id).map(Session::state)
    }

    /// Presence directory.
    pub fn presence(&self) -> &PresenceDirectory<E::Instant> {
        &self.presence
    }

    /// Room registry.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Message logs.
    pub fn message_log(&self) -> &MessageLog {
        &self.log
    }

    /// Typing indicators.
    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Configuration in use.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Environment in use.
    pub fn env(&self) -> &E {
        &self.env
    }
}

impl<E> std::fmt::Debug for ServerDriver<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connection_count", &self.sessions.len())
            .field("connected_users", &self.presence.connected_count())
            .field("total_messages", &self.log.total_messages())
            .finish()
    }
}
