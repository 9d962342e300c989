//! Scripted relay scenarios under the deterministic environment.
//!
//! Each scenario drives [`SimRelay`] through a fixed story and checks the
//! standard invariants after every step, then pins the final state.

use std::time::Duration;

use parlor_core::{SessionId, SessionState};
use parlor_harness::{InvariantRegistry, SimEnv, SimRelay, SystemSnapshot};
use parlor_proto::{
    MessageId, Payload, RoomId, UserId,
    payloads::{
        records::MessageKind,
        requests::{JoinRoom, MarkMessageRead, ReactToMessage, SendMessage, TypingSignal},
        session::Hello,
    },
};
use parlor_server::DriverConfig;

struct Story {
    relay: SimRelay,
    registry: InvariantRegistry,
    before: SystemSnapshot,
    next_request_id: u32,
}

impl Story {
    fn new(seed: u64) -> Self {
        Self::with_config(seed, DriverConfig::default())
    }

    fn with_config(seed: u64, config: DriverConfig) -> Self {
        let relay = SimRelay::with_config(SimEnv::with_seed(seed), config).unwrap();
        let before = SystemSnapshot::capture(relay.driver());
        Self { relay, registry: InvariantRegistry::standard(), before, next_request_id: 1 }
    }

    fn check(&mut self, step: &str) {
        let after = SystemSnapshot::capture(self.relay.driver());
        if let Err(violations) = self.registry.check_step(&self.before, &after) {
            panic!("invariants broken after {step}: {violations:?}");
        }
        self.before = after;
    }

    fn request(&mut self, session: SessionId, payload: Payload) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.relay.request(session, payload, request_id).unwrap();
        self.check("request");
    }

    fn connect(&mut self, user_id: &str) -> SessionId {
        let session = self.relay.open().unwrap();
        let credential = format!(r#"{{"userId":"{user_id}","username":"{user_id}"}}"#);
        self.request(session, Payload::Hello(Hello::with_credential(credential)));
        session
    }

    fn say(&mut self, session: SessionId, room: &str, content: &str) {
        self.request(
            session,
            Payload::SendMessage(SendMessage {
                room_id: RoomId::from(room),
                content: content.to_string(),
                kind: MessageKind::Text,
            }),
        );
    }

    fn join(&mut self, session: SessionId, room: &str) {
        self.request(session, Payload::JoinRoom(JoinRoom { room_id: RoomId::from(room) }));
    }

    fn last_message(&self, room: &str) -> MessageId {
        let log = self.relay.driver().message_log().history(&RoomId::from(room)).unwrap();
        log.last().unwrap().message_id.clone()
    }

    fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::capture(self.relay.driver())
    }
}

#[test]
fn conversation_final_state() {
    let mut story = Story::new(11);
    let u1 = story.connect("u1");
    let u2 = story.connect("u2");

    story.say(u1, "general", "hi");
    let message_id = story.last_message("general");
    story.request(
        u2,
        Payload::ReactToMessage(ReactToMessage {
            message_id: message_id.clone(),
            room_id: RoomId::from("general"),
            reaction: "+1".to_string(),
        }),
    );
    story.request(
        u2,
        Payload::MarkMessageRead(MarkMessageRead { message_id, room_id: RoomId::from("general") }),
    );
    story.join(u2, "random");

    insta::assert_json_snapshot!(story.snapshot(), @r#"
    {
      "users": [
        {
          "user_id": "u1",
          "connected": true,
          "connection": 1,
          "current_room": "general"
        },
        {
          "user_id": "u2",
          "connected": true,
          "connection": 2,
          "current_room": "random"
        }
      ],
      "rooms": [
        {
          "room_id": "general",
          "members": [
            "u1"
          ],
          "messages": [
            {
              "log_index": 0,
              "author_id": "u1",
              "content": "hi",
              "sent_at_ms": 1700000000000,
              "reactions": {
                "u2": "+1"
              },
              "read_by": [
                "u1",
                "u2"
              ]
            }
          ]
        },
        {
          "room_id": "random",
          "members": [
            "u2"
          ],
          "messages": []
        }
      ]
    }
    "#);
}

#[test]
fn history_survives_disconnects_and_expiry() {
    let mut story = Story::new(5);
    let u1 = story.connect("u1");
    story.say(u1, "general", "first");
    story.say(u1, "general", "second");

    story.relay.drop_connection(u1).unwrap();
    story.check("disconnect");
    story.relay.advance(Duration::from_secs(300)).unwrap();
    story.check("expiry");

    let snapshot = story.snapshot();
    assert!(snapshot.users.is_empty());
    assert_eq!(snapshot.message_count(), 2);

    let u1 = story.connect("u1");
    let joined = story
        .relay
        .take_payloads(u1)
        .into_iter()
        .find_map(|p| match p {
            Payload::RoomJoined(joined) => Some(joined),
            _ => None,
        })
        .unwrap();
    let contents: Vec<_> = joined.history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["first", "second"]);
}

#[test]
fn timestamps_follow_virtual_time() {
    let mut story = Story::new(2);
    let u1 = story.connect("u1");

    story.say(u1, "general", "a");
    story.relay.advance(Duration::from_millis(1_500)).unwrap();
    story.say(u1, "general", "b");

    let snapshot = story.snapshot();
    let times: Vec<_> = snapshot.rooms[0].messages.iter().map(|m| m.sent_at_ms).collect();
    assert_eq!(times, [1_700_000_000_000, 1_700_000_001_500]);
}

#[test]
fn takeover_leaves_one_live_connection() {
    let mut story = Story::new(8);
    let first = story.connect("u1");
    story.join(first, "random");
    let second = story.connect("u1");

    assert_eq!(story.relay.closed()[0].0, first);
    assert_eq!(story.relay.driver().session_state(first), None);
    assert_eq!(story.relay.driver().session_state(second), Some(SessionState::Active));

    let user = story.snapshot().user(&UserId::from("u1")).cloned().unwrap();
    assert_eq!(user.connection, Some(second));
    assert_eq!(user.current_room, Some(RoomId::from("random")));
}

#[test]
fn silent_connection_times_out() {
    let mut story = Story::new(3);
    let silent = story.relay.open().unwrap();
    let talker = story.connect("u1");

    story.relay.advance(Duration::from_secs(31)).unwrap();
    story.check("tick");

    assert_eq!(story.relay.closed().len(), 1);
    assert_eq!(story.relay.closed()[0].0, silent);
    assert_eq!(story.relay.driver().connection_count(), 1);
    assert_eq!(story.relay.driver().session_state(talker), Some(SessionState::Active));
}

#[test]
fn typing_in_unknown_room_is_ignored() {
    let mut story = Story::new(4);
    let u1 = story.connect("u1");
    let u2 = story.connect("u2");
    story.relay.clear_inboxes();

    story.request(u1, Payload::TypingStart(TypingSignal { room_id: RoomId::from("nowhere") }));

    assert!(story.relay.take(u1).is_empty());
    assert!(story.relay.take(u2).is_empty());
    assert!(story.relay.driver().typing().is_empty());
}

#[test]
fn message_ids_depend_on_seed() {
    let ids: Vec<_> = [1, 1, 2]
        .into_iter()
        .map(|seed| {
            let mut story = Story::new(seed);
            let u1 = story.connect("u1");
            story.say(u1, "general", "x");
            story.last_message("general")
        })
        .collect();

    assert_eq!(ids[0], ids[1]);
    assert_ne!(ids[0], ids[2]);
}
