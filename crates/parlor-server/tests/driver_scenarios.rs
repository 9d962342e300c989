//! End-to-end behavior of the driver, one event at a time.
//!
//! Each test plays a small conversation and checks what every participant
//! would have received, decoded from the emitted frames.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parlor_core::{Environment, SessionId};
use parlor_proto::{
    ErrorPayload, Frame, MessageId, Payload, RoomId, UserId,
    payloads::{
        records::MessageKind,
        requests::{
            JoinRoom, MarkMessageRead, ReactToMessage, SendMessage, SendPrivateMessage,
            TypingSignal,
        },
        session::Hello,
    },
};
use parlor_server::{
    DriverConfig, DuplicateLoginPolicy, ServerAction, ServerDriver, ServerEvent,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Clone)]
struct TestEnv {
    base: Instant,
    offset_ms: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl TestEnv {
    fn new(seed: u64) -> Self {
        Self {
            base: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        1_700_000_000_000 + self.offset_ms.load(Ordering::SeqCst)
    }
}

/// Driver plus a per-session inbox of decoded payloads.
struct Chat {
    driver: ServerDriver<TestEnv>,
    inbox: Vec<(SessionId, Payload)>,
    closed: Vec<SessionId>,
}

impl Chat {
    fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    fn with_config(config: DriverConfig) -> Self {
        Self {
            driver: ServerDriver::new(TestEnv::new(42), config).unwrap(),
            inbox: Vec::new(),
            closed: Vec::new(),
        }
    }

    fn apply(&mut self, event: ServerEvent) {
        for action in self.driver.process_event(event).unwrap() {
            match action {
                ServerAction::SendToSession { session_id, frame } => {
                    self.inbox.push((session_id, Payload::from_frame(&frame).unwrap()));
                },
                ServerAction::Broadcast { sessions, frame } => {
                    let payload = Payload::from_frame(&frame).unwrap();
                    for session_id in sessions {
                        self.inbox.push((session_id, payload.clone()));
                    }
                },
                ServerAction::CloseConnection { session_id, .. } => self.closed.push(session_id),
                ServerAction::Log { .. } => {},
            }
        }
    }

    fn send(&mut self, session_id: SessionId, payload: Payload) {
        self.send_with_id(session_id, payload, 0);
    }

    fn send_with_id(&mut self, session_id: SessionId, payload: Payload, request_id: u32) {
        let frame: Frame = payload.into_reply(request_id).unwrap();
        self.apply(ServerEvent::FrameReceived { session_id, frame });
    }

    fn connect(&mut self, session_id: SessionId, user_id: &str, username: &str) {
        self.apply(ServerEvent::ConnectionAccepted { session_id });
        let credential = format!(r#"{{"userId":"{user_id}","username":"{username}"}}"#);
        self.send(session_id, Payload::Hello(Hello::with_credential(credential)));
    }

    fn drop_connection(&mut self, session_id: SessionId) {
        self.apply(ServerEvent::ConnectionClosed { session_id, reason: "lost".to_string() });
    }

    fn say(&mut self, session_id: SessionId, room: &str, content: &str) {
        self.send(
            session_id,
            Payload::SendMessage(SendMessage {
                room_id: RoomId::from(room),
                content: content.to_string(),
                kind: MessageKind::Text,
            }),
        );
    }

    fn join(&mut self, session_id: SessionId, room: &str) {
        self.send(session_id, Payload::JoinRoom(JoinRoom { room_id: RoomId::from(room) }));
    }

    /// Everything delivered to `session_id` since the last call.
    fn take(&mut self, session_id: SessionId) -> Vec<Payload> {
        let (mine, rest) = std::mem::take(&mut self.inbox)
            .into_iter()
            .partition::<Vec<_>, _>(|(id, _)| *id == session_id);
        self.inbox = rest;
        mine.into_iter().map(|(_, payload)| payload).collect()
    }

    fn last_message_id(&self, room: &str) -> MessageId {
        self.driver
            .message_log()
            .history(&RoomId::from(room))
            .unwrap()
            .last()
            .unwrap()
            .message_id
            .clone()
    }
}

fn error_code(payloads: &[Payload]) -> Option<u16> {
    payloads.iter().find_map(|p| match p {
        Payload::Error(error) => Some(error.code),
        _ => None,
    })
}

#[test]
fn first_message_lands_in_history() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.say(1, "general", "hello");

    let history = chat.driver.message_log().history(&RoomId::from("general")).unwrap();
    assert_eq!(history.len(), 1);

    let message = &history[0];
    assert_eq!(message.author_name, "Alice");
    assert_eq!(message.content, "hello");
    assert_eq!(message.log_index, 0);
    assert!(message.reactions.is_empty());
    assert_eq!(message.read_by.iter().collect::<Vec<_>>(), [&UserId::from("u1")]);
}

#[test]
fn sender_sees_own_message_but_no_notification() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.take(1);
    chat.take(2);

    chat.say(1, "general", "hi");

    let alice = chat.take(1);
    assert!(matches!(alice[..], [Payload::NewMessage(_)]));

    let bob = chat.take(2);
    assert!(matches!(bob[..], [Payload::NewMessage(_), Payload::Notification(_)]));
    let Payload::Notification(notification) = &bob[1] else { unreachable!() };
    assert_eq!(notification.message, "Alice sent a message");
    assert_eq!(notification.kind, "new_message");
    assert_eq!(notification.from, "Alice");
}

#[test]
fn rooms_are_isolated() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.join(2, "random");
    chat.take(1);

    chat.say(2, "random", "only for random");

    assert!(chat.take(1).is_empty());
    assert!(chat.take(2).iter().any(|p| matches!(p, Payload::NewMessage(_))));
}

#[test]
fn private_message_to_offline_user_is_unavailable() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.take(1);

    chat.send_with_id(
        1,
        Payload::SendPrivateMessage(SendPrivateMessage {
            to_user_id: UserId::from("ghost"),
            content: "anyone?".to_string(),
        }),
        77,
    );

    assert_eq!(error_code(&chat.take(1)), Some(ErrorPayload::USER_UNAVAILABLE));
    assert_eq!(chat.driver.message_log().total_messages(), 0);
}

#[test]
fn private_message_reaches_recipient_and_acknowledges_sender() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.join(2, "random");
    chat.take(1);
    chat.take(2);

    chat.send(
        1,
        Payload::SendPrivateMessage(SendPrivateMessage {
            to_user_id: UserId::from("u2"),
            content: "psst".to_string(),
        }),
    );

    let bob = chat.take(2);
    let Payload::PrivateMessage(delivered) = &bob[0] else { panic!("unexpected: {bob:?}") };
    assert_eq!(delivered.message.from_username, "Alice");
    assert_eq!(delivered.message.content, "psst");

    assert!(matches!(chat.take(1)[..], [Payload::PrivateMessageSent(_)]));
    assert_eq!(chat.driver.message_log().total_messages(), 0);
}

#[test]
fn reconnect_reuses_identity() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.drop_connection(1);
    chat.take(2);

    chat.connect(3, "u1", "Alice");

    let presence = chat.driver.presence();
    assert_eq!(presence.len(), 2);
    assert!(presence.user(&UserId::from("u1")).unwrap().connected());

    let bob = chat.take(2);
    assert!(bob.iter().any(|p| matches!(p, Payload::UserReconnected(_))));
    assert!(!bob.iter().any(|p| matches!(p, Payload::UserConnected(_))));
}

#[test]
fn reconnect_restores_previous_room() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.join(1, "random");
    chat.drop_connection(1);

    chat.connect(2, "u1", "Alice");

    assert_eq!(chat.driver.rooms().room_of(&UserId::from("u1")), Some(&RoomId::from("random")));
}

#[test]
fn duplicate_login_takes_over() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u1", "Alice");

    assert_eq!(chat.closed, [1]);
    assert_eq!(chat.driver.presence().connection_of(&UserId::from("u1")), Some(2));

    // The stale connection closing must not take the user offline.
    chat.drop_connection(1);
    assert!(chat.driver.presence().user(&UserId::from("u1")).unwrap().connected());
    assert_eq!(chat.driver.rooms().room_of(&UserId::from("u1")), Some(&RoomId::from("general")));
}

#[test]
fn duplicate_login_can_be_rejected() {
    let config =
        DriverConfig { duplicate_login: DuplicateLoginPolicy::Reject, ..Default::default() };
    let mut chat = Chat::with_config(config);
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u1", "Alice");

    assert_eq!(chat.closed, [2]);
    assert_eq!(error_code(&chat.take(2)), Some(ErrorPayload::MALFORMED_REQUEST));
    assert_eq!(chat.driver.presence().connection_of(&UserId::from("u1")), Some(1));
}

#[test]
fn joining_unknown_room_changes_nothing() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.take(1);

    chat.join(1, "lobby");

    assert_eq!(error_code(&chat.take(1)), Some(ErrorPayload::ROOM_NOT_FOUND));
    assert_eq!(chat.driver.rooms().room_of(&UserId::from("u1")), Some(&RoomId::from("general")));
}

#[test]
fn switching_rooms_notifies_both_rooms() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.connect(3, "u3", "Carol");
    chat.join(3, "random");
    chat.take(1);
    chat.take(2);
    chat.take(3);

    chat.join(2, "random");

    assert!(matches!(chat.take(1)[..], [Payload::UserLeftRoom(_)]));
    assert!(matches!(chat.take(3)[..], [Payload::UserJoinedRoom(_)]));
    let bob = chat.take(2);
    let Payload::RoomJoined(joined) = &bob[0] else { panic!("unexpected: {bob:?}") };
    assert_eq!(joined.room.room_id, RoomId::from("random"));
}

#[test]
fn rejoining_current_room_is_quiet() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.take(1);
    chat.take(2);

    chat.join(2, "general");

    assert!(chat.take(1).is_empty());
    assert!(matches!(chat.take(2)[..], [Payload::RoomJoined(_)]));
}

#[test]
fn reactions_overwrite_per_user() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.say(1, "general", "react to me");
    let message_id = chat.last_message_id("general");

    for reaction in ["👍", "🎉"] {
        chat.send(
            1,
            Payload::ReactToMessage(ReactToMessage {
                message_id: message_id.clone(),
                room_id: RoomId::from("general"),
                reaction: reaction.to_string(),
            }),
        );
    }

    let message =
        chat.driver.message_log().get(&message_id, &RoomId::from("general")).unwrap();
    assert_eq!(message.reactions.len(), 1);
    assert_eq!(message.reactions[&UserId::from("u1")], "🎉");
}

#[test]
fn blank_reaction_is_malformed() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.say(1, "general", "x");
    let message_id = chat.last_message_id("general");
    chat.take(1);

    chat.send(
        1,
        Payload::ReactToMessage(ReactToMessage {
            message_id,
            room_id: RoomId::from("general"),
            reaction: "  ".to_string(),
        }),
    );

    assert_eq!(error_code(&chat.take(1)), Some(ErrorPayload::MALFORMED_REQUEST));
}

#[test]
fn reaction_on_message_from_other_room_is_not_found() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.say(1, "general", "x");
    let message_id = chat.last_message_id("general");
    chat.take(1);

    chat.send(
        1,
        Payload::ReactToMessage(ReactToMessage {
            message_id,
            room_id: RoomId::from("random"),
            reaction: "👍".to_string(),
        }),
    );

    assert_eq!(error_code(&chat.take(1)), Some(ErrorPayload::MESSAGE_NOT_FOUND));
}

#[test]
fn repeated_read_is_relayed_but_recorded_once() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.say(1, "general", "read me");
    let message_id = chat.last_message_id("general");
    chat.take(1);
    chat.take(2);

    let read = Payload::MarkMessageRead(MarkMessageRead {
        message_id: message_id.clone(),
        room_id: RoomId::from("general"),
    });
    chat.send(2, read.clone());
    chat.send(2, read);

    assert!(matches!(chat.take(1)[..], [Payload::MessageRead(_), Payload::MessageRead(_)]));
    assert!(chat.take(2).is_empty());

    let message =
        chat.driver.message_log().get(&message_id, &RoomId::from("general")).unwrap();
    assert_eq!(message.read_by.len(), 2);
}

#[test]
fn history_larger_than_a_frame_arrives_in_parts() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    let bulk = "x".repeat(100_000);
    for _ in 0..12 {
        chat.say(1, "general", &bulk);
    }
    chat.take(1);

    chat.apply(ServerEvent::ConnectionAccepted { session_id: 2 });
    let credential = r#"{"userId":"u2","username":"Bob"}"#.to_string();
    chat.send_with_id(2, Payload::Hello(Hello::with_credential(credential)), 7);

    let bob = chat.take(2);
    assert!(matches!(bob[..2], [Payload::UsersList(_), Payload::RoomsList(_)]));
    let parts: Vec<_> = bob[2..]
        .iter()
        .map(|payload| match payload {
            Payload::RoomJoined(part) => part.clone(),
            other => panic!("unexpected payload: {other:?}"),
        })
        .collect();
    assert!(parts.len() > 1);
    assert!(parts[..parts.len() - 1].iter().all(|part| part.more));
    assert!(!parts[parts.len() - 1].more);

    let history: Vec<_> = parts.iter().flat_map(|part| part.history.iter()).collect();
    assert_eq!(history.len(), 12);
    assert!(history.iter().enumerate().all(|(i, m)| m.log_index == i as u64));

    // The rest of the connect still happens.
    assert!(matches!(chat.take(1)[..], [Payload::UserConnected(_), Payload::UserJoinedRoom(_)]));
}

#[test]
fn typing_is_relayed_to_others_and_cleared_on_disconnect() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.take(1);
    chat.take(2);

    chat.send(1, Payload::TypingStart(TypingSignal { room_id: RoomId::from("general") }));
    assert!(chat.take(1).is_empty());
    assert!(matches!(chat.take(2)[..], [Payload::UserTyping(_)]));

    chat.drop_connection(1);
    assert!(matches!(chat.take(2)[..], [Payload::UserStopTyping(_), Payload::UserDisconnected(_)]));
    assert!(chat.driver.typing().is_empty());
}

#[test]
fn messages_arrive_in_append_order() {
    let mut chat = Chat::new();
    chat.connect(1, "u1", "Alice");
    chat.connect(2, "u2", "Bob");
    chat.take(2);

    for n in 0..20 {
        chat.say(1 + n % 2, "general", &format!("m{n}"));
    }

    let seen: Vec<_> = chat
        .take(2)
        .into_iter()
        .filter_map(|p| match p {
            Payload::NewMessage(event) => Some(event.message.content),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = (0..20).map(|n| format!("m{n}")).collect();
    assert_eq!(seen, expected);
}

#[test]
fn anonymous_hello_gets_generated_identity() {
    let mut chat = Chat::new();
    chat.apply(ServerEvent::ConnectionAccepted { session_id: 1 });
    chat.send(1, Payload::Hello(Hello::with_credential(b"not json".to_vec())));

    let user = chat.driver.presence().user_for_session(1).unwrap();
    assert!(user.user_id().as_str().starts_with("user_"));
    assert!(user.username().starts_with("Anonymous"));
}

#[test]
fn nameless_claims_at_the_same_instant_stay_separate_users() {
    let mut chat = Chat::new();
    for (session_id, username) in [(1, "Bob"), (2, "Carol")] {
        chat.apply(ServerEvent::ConnectionAccepted { session_id });
        let credential = format!(r#"{{"username":"{username}"}}"#);
        chat.send(session_id, Payload::Hello(Hello::with_credential(credential)));
    }

    assert!(chat.closed.is_empty());
    assert_eq!(chat.driver.presence().len(), 2);
    assert_eq!(chat.driver.presence().connected_count(), 2);
}
