//! Fuzz target for frame header boundary conditions
//!
//! Arbitrary byte sequences plus structured near-miss headers through
//! `Frame::decode`.
//!
//! # Strategy
//!
//! - Raw bytes: completely arbitrary input
//! - Magic bytes: valid, off-by-one, all-zeros, all-ones, random
//! - Payload size: zero, small, at-max, just-over-max, `u32::MAX`
//! - Version: valid (0x01), zero, max, random
//!
//! # Invariants
//!
//! - Decode never panics; invalid input returns an error
//! - A successful decode implies valid magic, version and size bound
//! - Encoded size is exactly 16 + payload length, and re-decodes identically

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parlor_proto::{Frame, FrameHeader, Opcode};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Raw(Vec<u8>),
    Boundary(BoundaryFrame),
}

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    magic: MagicBytes,
    version: VersionBytes,
    opcode: u16,
    request_id: u32,
    payload_size: PayloadSize,
    truncate: bool,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionBytes {
    Valid,
    Zero,
    Max,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMaxBoundary,
    JustOverMax,
    MaxU32,
    Random(u32),
}

fuzz_target!(|input: Input| {
    let boundary = match input {
        Input::Raw(bytes) => {
            if let Ok(frame) = Frame::decode(&bytes) {
                assert!(frame.header.payload_size() <= FrameHeader::MAX_PAYLOAD_SIZE);
                assert_eq!(frame.payload.len(), frame.header.payload_size() as usize);
            }
            return;
        },
        Input::Boundary(boundary) => boundary,
    };

    let payload_size = match boundary.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::Small(s) => u32::from(s),
        PayloadSize::AtMaxBoundary => FrameHeader::MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => FrameHeader::MAX_PAYLOAD_SIZE + 1,
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(r) => r,
    };

    let mut present = payload_size.min(100_000) as usize;
    if boundary.truncate {
        present = present.saturating_sub(1);
    }
    let mut buffer = vec![0u8; FrameHeader::SIZE + present];

    let magic = FrameHeader::MAGIC.to_be_bytes();
    match boundary.magic {
        MagicBytes::Valid => buffer[0..4].copy_from_slice(&magic),
        MagicBytes::OffByOne(offset) => {
            buffer[0..4].copy_from_slice(&magic);
            let idx = (offset % 4) as usize;
            buffer[idx] = buffer[idx].wrapping_add(1);
        },
        MagicBytes::AllZeros => buffer[0..4].fill(0),
        MagicBytes::AllOnes => buffer[0..4].fill(0xFF),
        MagicBytes::Random(bytes) => buffer[0..4].copy_from_slice(&bytes),
    }

    buffer[4] = match boundary.version {
        VersionBytes::Valid => FrameHeader::VERSION,
        VersionBytes::Zero => 0,
        VersionBytes::Max => u8::MAX,
        VersionBytes::Random(v) => v,
    };
    buffer[6..8].copy_from_slice(&boundary.opcode.to_be_bytes());
    buffer[8..12].copy_from_slice(&boundary.request_id.to_be_bytes());
    buffer[12..16].copy_from_slice(&payload_size.to_be_bytes());

    if let Ok(frame) = Frame::decode(&buffer) {
        assert_eq!(buffer[0..4], magic);
        assert_eq!(buffer[4], FrameHeader::VERSION);
        assert!(payload_size <= FrameHeader::MAX_PAYLOAD_SIZE);
        assert_eq!(frame.header.request_id(), boundary.request_id);
        assert_eq!(frame.payload.len(), payload_size as usize);
    }

    if let Some(opcode) = Opcode::from_u16(boundary.opcode) {
        let payload = vec![0xAA; present.min(1000)];
        let frame = Frame::new(FrameHeader::reply(opcode, boundary.request_id), payload);

        let Ok(encoded) = frame.to_vec() else {
            return;
        };
        assert_eq!(encoded.len(), FrameHeader::SIZE + frame.payload.len());

        let decoded = Frame::decode(&encoded).expect("re-decode of encoded frame");
        assert_eq!(decoded, frame);
    }
});
