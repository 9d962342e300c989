//! Fuzz target for Payload::from_frame
//!
//! This fuzzer tests payload deserialization (CBOR decoding) with:
//! - Malformed CBOR data
//! - Type confusion (a body meant for one opcode under another)
//! - Oversized strings or collections
//! - Nested structures
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error,
//! and anything that decodes must survive an encode/decode cycle unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parlor_proto::{Frame, FrameHeader, Opcode, Payload};

fn opcodes() -> impl Iterator<Item = Opcode> {
    (0x0001..=0x0002u16)
        .chain(0x0101..=0x0107)
        .chain(0x0201..=0x0210)
        .chain([0x02FF])
        .filter_map(Opcode::from_u16)
}

fuzz_target!(|data: &[u8]| {
    for opcode in opcodes() {
        let frame = Frame::new(FrameHeader::reply(opcode, 7), data.to_vec());

        let Ok(payload) = Payload::from_frame(&frame) else {
            continue;
        };
        assert_eq!(payload.opcode(), opcode);

        let reencoded = payload.clone().into_reply(7).expect("decoded payload re-encodes");
        let again = Payload::from_frame(&reencoded).expect("re-encoded payload decodes");
        assert_eq!(again, payload);
    }
});
