//! Fuzz target for the server driver's event loop
//!
//! Drives `ServerDriver` through arbitrary sequences of connection events,
//! well-formed requests, raw frames and clock movement, then checks the
//! engine invariants after every step.
//!
//! # Strategy
//!
//! - Well-formed requests from a handful of sessions and identities
//! - Raw frames with arbitrary opcodes and bodies (type confusion)
//! - Duplicate accepts and closes of unknown sessions
//! - Time jumps across handshake timeout and grace window
//!
//! # Invariants
//!
//! - The driver never panics
//! - Runtime misuse (unknown session, reused id) is the only error surfaced
//! - Presence, membership and history invariants hold after every event

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parlor_harness::{InvariantRegistry, SimEnv, SimRelay, SimRelayError, SystemSnapshot};
use parlor_proto::{
    Frame, FrameHeader, MessageId, Opcode, Payload, RoomId, UserId,
    payloads::{
        records::MessageKind,
        requests::{
            JoinRoom, MarkMessageRead, ReactToMessage, SendMessage, SendPrivateMessage,
            TypingSignal,
        },
        session::{Goodbye, Hello},
    },
};
use parlor_server::{DriverError, ServerEvent};

const ROOMS: [&str; 3] = ["general", "random", "nowhere"];

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Step {
    Accept { session: u8 },
    Close { session: u8 },
    Hello { session: u8, user: u8, anonymous: bool },
    Request { session: u8, request: Request },
    Raw { session: u8, opcode: u16, body: Vec<u8> },
    Advance { seconds: u8 },
}

#[derive(Debug, Clone, Arbitrary)]
enum Request {
    Goodbye,
    Join { room: u8 },
    Send { room: u8, content: String },
    Typing { room: u8, start: bool },
    React { room: u8, position: u8, reaction: String },
    MarkRead { room: u8, position: u8 },
    Private { to: u8, content: String },
}

fn room(selector: u8) -> RoomId {
    RoomId::from(ROOMS[selector as usize % ROOMS.len()])
}

fn session_id(selector: u8) -> u64 {
    u64::from(selector % 6)
}

fn message_at(relay: &SimRelay, room_id: &RoomId, position: u8) -> MessageId {
    relay
        .driver()
        .message_log()
        .history(room_id)
        .ok()
        .and_then(|log| log.get(position as usize))
        .map_or_else(|| MessageId::from_u128(u128::from(position)), |m| m.message_id.clone())
}

fn payload_for(relay: &SimRelay, request: Request) -> Payload {
    match request {
        Request::Goodbye => Payload::Goodbye(Goodbye { reason: "fuzz".to_string() }),
        Request::Join { room: r } => Payload::JoinRoom(JoinRoom { room_id: room(r) }),
        Request::Send { room: r, content } => Payload::SendMessage(SendMessage {
            room_id: room(r),
            content,
            kind: MessageKind::Text,
        }),
        Request::Typing { room: r, start } => {
            let signal = TypingSignal { room_id: room(r) };
            if start { Payload::TypingStart(signal) } else { Payload::TypingStop(signal) }
        },
        Request::React { room: r, position, reaction } => {
            let room_id = room(r);
            Payload::ReactToMessage(ReactToMessage {
                message_id: message_at(relay, &room_id, position),
                room_id,
                reaction,
            })
        },
        Request::MarkRead { room: r, position } => {
            let room_id = room(r);
            Payload::MarkMessageRead(MarkMessageRead {
                message_id: message_at(relay, &room_id, position),
                room_id,
            })
        },
        Request::Private { to, content } => Payload::SendPrivateMessage(SendPrivateMessage {
            to_user_id: UserId::new(format!("u{}", to % 4)),
            content,
        }),
    }
}

/// Only runtime misuse may surface; everything else is reported in-band.
fn tolerate(result: Result<(), SimRelayError>) {
    match result {
        Ok(())
        | Err(SimRelayError::Driver(
            DriverError::SessionNotFound(_) | DriverError::SessionAlreadyExists(_),
        )) => {},
        Err(e) => panic!("unexpected driver failure: {e}"),
    }
}

fuzz_target!(|scenario: Scenario| {
    let Ok(mut relay) = SimRelay::new(SimEnv::with_seed(scenario.seed)) else {
        return;
    };
    let registry = InvariantRegistry::standard();
    let mut before = SystemSnapshot::capture(relay.driver());

    for step in scenario.steps.into_iter().take(200) {
        let result = match step {
            Step::Accept { session } => relay
                .process(ServerEvent::ConnectionAccepted { session_id: session_id(session) }),
            Step::Close { session } => relay.drop_connection(session_id(session)),
            Step::Hello { session, user, anonymous } => {
                let hello = if anonymous {
                    Hello::anonymous()
                } else {
                    let user = user % 4;
                    Hello::with_credential(format!(r#"{{"userId":"u{user}","username":"U{user}"}}"#))
                };
                relay.request(session_id(session), Payload::Hello(hello), 1)
            },
            Step::Request { session, request } => {
                let payload = payload_for(&relay, request);
                relay.request(session_id(session), payload, 2)
            },
            Step::Raw { session, opcode, body } => {
                let mut header = FrameHeader::new(Opcode::Hello);
                if let Some(opcode) = Opcode::from_u16(opcode) {
                    header.set_opcode(opcode);
                }
                relay.send_frame(session_id(session), Frame::new(header, body))
            },
            Step::Advance { seconds } => {
                relay.advance(Duration::from_secs(u64::from(seconds)))
            },
        };
        tolerate(result);
        relay.clear_inboxes();

        let after = SystemSnapshot::capture(relay.driver());
        if let Err(violations) = registry.check_step(&before, &after) {
            panic!("invariant violation: {violations:?}");
        }
        before = after;
    }
});
