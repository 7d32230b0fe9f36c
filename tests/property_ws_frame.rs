//! Property tests for the WebSocket frame codec (RFC 6455).
//!
//! Verifies mask involution, encode/decode round-trips across all payload
//! length encodings, chunking invariance, opcode parsing, and close-code
//! validation.

#![allow(missing_docs)]

mod common;

use bytes::Bytes;
use common::{init_test_logging, parse_client_frames, test_proptest_config};
use proptest::prelude::*;
use wavesock::{
    apply_mask, encode_frame_with_key, validate_close_code, ChunkQueue, FrameDecoder, Opcode,
};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_mask_key() -> impl Strategy<Value = [u8; 4]> {
    any::<[u8; 4]>()
}

fn arb_payload_any() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=4096)
}

fn arb_invalid_opcode_byte() -> impl Strategy<Value = u8> {
    prop_oneof![3u8..=7u8, 0x0Bu8..=0x0Fu8]
}

fn arb_data_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![Just(Opcode::Text), Just(Opcode::Binary)]
}

/// An unmasked server frame around the payload, using the shortest length
/// encoding that fits.
fn server_stream(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut stream = vec![0x80 | opcode as u8];
    if payload.len() <= 125 {
        stream.push(payload.len() as u8);
    } else if payload.len() <= 65535 {
        stream.push(126);
        stream.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        stream.push(127);
        stream.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    stream.extend_from_slice(payload);
    stream
}

// ============================================================================
// Mask Involution: apply_mask(apply_mask(data, key), key) == data
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(500))]

    /// XOR masking is self-inverse (involution).
    #[test]
    fn mask_is_involution(data in arb_payload_any(), key in arb_mask_key()) {
        init_test_logging();
        let original = data.clone();
        let mut buf = data;
        apply_mask(&mut buf, key);
        apply_mask(&mut buf, key);
        prop_assert_eq!(buf, original, "double masking must yield original data");
    }

    /// Masking with zero key is identity.
    #[test]
    fn mask_zero_key_is_identity(data in arb_payload_any()) {
        init_test_logging();
        let original = data.clone();
        let mut buf = data;
        apply_mask(&mut buf, [0, 0, 0, 0]);
        prop_assert_eq!(buf, original, "zero mask key should be identity");
    }
}

// ============================================================================
// Encoder: independent parse of the produced bytes recovers the input
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(300))]

    /// Encoded frames carry the mask bit, the right length encoding, and a
    /// payload that unmasks back to the input.
    #[test]
    fn encoded_frame_parses_back(
        opcode in arb_data_opcode(),
        payload in arb_payload_any(),
        key in arb_mask_key(),
    ) {
        init_test_logging();
        let encoded = encode_frame_with_key(opcode, &payload, None, key).unwrap();
        prop_assert_eq!(encoded[0], 0x80 | opcode as u8);
        prop_assert_ne!(encoded[1] & 0x80, 0, "client frames must set the mask bit");

        let frames = parse_client_frames(&encoded);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].0, opcode as u8);
        prop_assert_eq!(&frames[0].1, &payload);
    }

    /// Close frames prepend the big-endian code before masking.
    #[test]
    fn encoded_close_prepends_code(
        reason in prop::collection::vec(any::<u8>(), 0..=123),
        key in arb_mask_key(),
    ) {
        init_test_logging();
        let encoded = encode_frame_with_key(Opcode::Close, &reason, Some(1000), key).unwrap();
        let frames = parse_client_frames(&encoded);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(&frames[0].1[..2], &1000u16.to_be_bytes());
        prop_assert_eq!(&frames[0].1[2..], reason.as_slice());
    }
}

// ============================================================================
// Decoder: feed-order invariance and declared-length fidelity
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// Any chunking of the same byte stream decodes to the same frame.
    #[test]
    fn decode_is_chunking_invariant(
        opcode in arb_data_opcode(),
        payload in arb_payload_any(),
        chunk_sizes in prop::collection::vec(1usize..=97, 1..=64),
    ) {
        init_test_logging();
        let stream = server_stream(opcode, &payload);

        let mut whole = ChunkQueue::new();
        whole.append(Bytes::from(stream.clone()));
        let expected = FrameDecoder::new().decode(&mut whole).unwrap().unwrap();

        let mut queue = ChunkQueue::new();
        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();
        while offset < stream.len() {
            let size = *sizes.next().unwrap();
            let end = (offset + size).min(stream.len());
            queue.append(Bytes::copy_from_slice(&stream[offset..end]));
            offset = end;
            if let Some(frame) = decoder.decode(&mut queue).unwrap() {
                prop_assert!(decoded.is_none(), "stream holds exactly one frame");
                decoded = Some(frame);
            }
        }

        let decoded = decoded.expect("frame must finalize once all bytes arrive");
        prop_assert_eq!(decoded, expected);
    }

    /// The decoded payload length always equals the declared length.
    #[test]
    fn decoded_payload_matches_declared_length(payload in arb_payload_any()) {
        init_test_logging();
        let stream = server_stream(Opcode::Binary, &payload);
        let mut queue = ChunkQueue::new();
        queue.append(Bytes::from(stream));
        let frame = FrameDecoder::new().decode(&mut queue).unwrap().unwrap();
        prop_assert_eq!(frame.payload.len(), payload.len());
        prop_assert!(queue.is_empty(), "decoder must consume exactly one frame");
    }
}

// ============================================================================
// Opcode and close-code domains
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// Reserved opcode values never parse.
    #[test]
    fn reserved_opcodes_rejected(byte in arb_invalid_opcode_byte()) {
        init_test_logging();
        prop_assert!(Opcode::from_u8(byte).is_err());
    }

    /// Close-code validation accepts exactly the sendable set.
    #[test]
    fn close_code_validation_matches_sendable_set(code in any::<u16>()) {
        init_test_logging();
        let sendable = matches!(code, 1000..=1003 | 1007..=1015 | 3000..=4999);
        prop_assert_eq!(validate_close_code(code).is_ok(), sendable, "code {}", code);
    }
}
