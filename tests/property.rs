//! Property-based tests for the frame codec, reassembly and handshake parsing.

use proptest::prelude::*;
use wsengine::protocol::{
    Frame, HandshakeRequest, MessageAssembler, OpCode, Utf8Validator, apply_mask, apply_mask_fast,
    parse_close_payload,
};
use wsengine::{Error, Limits, Message};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Continuation),
    ]
}

fn control_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Close), Just(OpCode::Ping), Just(OpCode::Pong)]
}

/// Split `data` at the given (unsorted, possibly duplicate) positions.
fn split_at_points(data: &[u8], mut points: Vec<usize>) -> Vec<&[u8]> {
    points.iter_mut().for_each(|p| *p %= data.len() + 1);
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(&data[start..point]);
        start = point;
    }
    chunks.push(&data[start..]);
    chunks
}

proptest! {
    #[test]
    fn test_roundtrip(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1000),
        mask in prop::option::of(any::<[u8; 4]>())
    ) {
        let frame = Frame::new(fin, opcode, payload);
        let wire = frame.encode(mask);
        prop_assert_eq!(wire.len(), frame.wire_size(mask.is_some()));

        let (parsed, consumed) = Frame::parse(&wire).unwrap();
        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(parsed, frame);
    }

    #[test]
    fn test_mask_reversible(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(data, masked);
    }

    #[test]
    fn test_fast_mask_matches_bytewise(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut slow = data.clone();
        let mut fast = data;
        apply_mask(&mut slow, mask);
        apply_mask_fast(&mut fast, mask);
        prop_assert_eq!(slow, fast);
    }

    #[test]
    fn test_payload_length_encoding(len in 0usize..70000) {
        let frame = Frame::new(true, OpCode::Binary, vec![0x5A; len]);
        let wire = frame.encode(None);

        let expected_header = match len {
            0..=125 => 2,
            126..=65535 => 4,
            _ => 10,
        };
        prop_assert_eq!(wire.len(), expected_header + len);

        let (parsed, _) = Frame::parse(&wire).unwrap();
        prop_assert_eq!(parsed.payload().len(), len);
    }

    #[test]
    fn test_control_frame_size_limit(
        opcode in control_opcode_strategy(),
        len in 0usize..256
    ) {
        let frame = Frame::new(true, opcode, vec![0u8; len]);
        let result = frame.validate();
        if len <= 125 {
            prop_assert!(result.is_ok(), "valid control frame rejected: {:?}", result);
        } else {
            prop_assert!(matches!(result, Err(Error::ControlFrameTooLarge(n)) if n == len));
        }
    }

    #[test]
    fn test_truncated_frame_is_incomplete(
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 1..500),
        masked in any::<bool>(),
        keep in any::<prop::sample::Index>()
    ) {
        let mask = masked.then_some([1, 2, 3, 4]);
        let wire = Frame::new(true, opcode, payload).encode(mask);
        let truncated = &wire[..keep.index(wire.len())];

        let result = Frame::parse(truncated);
        prop_assert!(matches!(result, Err(Error::IncompleteFrame { .. })), "got {:?}", result);
    }

    #[test]
    fn test_sequential_frame_parsing(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..6)
    ) {
        let frames: Vec<_> = payloads
            .into_iter()
            .map(|p| Frame::new(true, OpCode::Binary, p))
            .collect();

        let mut wire = bytes::BytesMut::new();
        for frame in &frames {
            frame.encode_into(&mut wire, None);
        }

        let mut offset = 0;
        for original in &frames {
            let (parsed, consumed) = Frame::parse(&wire[offset..]).unwrap();
            prop_assert_eq!(&parsed, original);
            offset += consumed;
        }
        prop_assert_eq!(offset, wire.len());
    }

    #[test]
    fn test_parse_arbitrary_bytes_never_panics(data in prop::collection::vec(any::<u8>(), 0..300)) {
        let _ = Frame::parse(&data);
        let _ = parse_close_payload(&data);
    }

    #[test]
    fn test_chunked_utf8_agrees_with_std(
        data in prop::collection::vec(any::<u8>(), 0..64),
        points in prop::collection::vec(any::<usize>(), 0..6)
    ) {
        let chunks = split_at_points(&data, points);
        let mut validator = Utf8Validator::new();
        let last = chunks.len() - 1;
        let chunked = chunks
            .iter()
            .enumerate()
            .try_for_each(|(i, chunk)| validator.validate(chunk, i == last));

        prop_assert_eq!(chunked.is_ok(), std::str::from_utf8(&data).is_ok());
    }

    #[test]
    fn test_fragmented_text_reassembles(
        text in "\\PC{0,40}",
        points in prop::collection::vec(any::<usize>(), 0..6)
    ) {
        let chunks = split_at_points(text.as_bytes(), points);
        let mut assembler = MessageAssembler::new(Limits::default());
        let last = chunks.len() - 1;

        let mut message = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let opcode = if i == 0 { OpCode::Text } else { OpCode::Continuation };
            message = assembler.push(Frame::new(i == last, opcode, chunk.to_vec())).unwrap();
            if i != last {
                prop_assert!(message.is_none());
                // Control frames may be interleaved between fragments.
                prop_assert!(assembler.push(Frame::ping(&b"x"[..])).unwrap().is_none());
            }
        }
        prop_assert_eq!(message, Some(Message::Text(text)));
        prop_assert!(!assembler.is_assembling());
    }
}

#[test]
fn test_length_encoding_boundaries() {
    for len in [0, 1, 125, 126, 127, 65535, 65536] {
        let frame = Frame::new(true, OpCode::Binary, vec![0xAB; len]);
        let wire = frame.encode(Some([0xFF; 4]));
        let (parsed, consumed) = Frame::parse(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(parsed.payload().len(), len);
    }
}

proptest! {
    #[test]
    fn test_handshake_parse_no_panic(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        if let Ok(request) = HandshakeRequest::parse(&data) {
            let _ = request.validate();
        }
    }

    #[test]
    fn test_handshake_valid_variations(
        path in "/[a-z]{1,20}",
        host in "[a-z]{3,10}\\.[a-z]{2,4}"
    ) {
        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );

        let parsed = HandshakeRequest::parse(request.as_bytes()).unwrap();
        prop_assert_eq!(&parsed.path, &path);
        prop_assert_eq!(parsed.host(), Some(host.as_str()));
        prop_assert_eq!(parsed.validate().unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }
}
