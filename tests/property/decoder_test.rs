// tests/property/decoder_test.rs

//! Property-based tests for stream framing
//! Tests that commands survive arbitrary fragmentation and that garbage input
//! is rejected without panicking.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use proptest::prelude::*;
use remora::core::handler::RpcCommandHandler;
use remora::core::protocol::rpc::{PROTOCOL_CODE, PROTOCOL_VERSION_1, PROTOCOL_VERSION_2};
use remora::core::protocol::{Protocol, ProtocolCodec, ProtocolRegistry, RpcProtocol};
use remora::core::{Command, ProtocolVersion, ResponseStatus};
use std::sync::Arc;
use tokio_util::codec::{Decoder, FramedRead};

const MAX_FRAME: usize = 64 * 1024;

fn rpc_protocol() -> Arc<RpcProtocol> {
    Arc::new(RpcProtocol::new(Arc::new(RpcCommandHandler::new()), MAX_FRAME))
}

fn registry() -> Arc<ProtocolRegistry> {
    let registry = Arc::new(ProtocolRegistry::new());
    registry.register(rpc_protocol()).unwrap();
    registry
}

fn status_strategy() -> impl Strategy<Value = ResponseStatus> {
    prop::sample::select(vec![
        ResponseStatus::Success,
        ResponseStatus::Error,
        ResponseStatus::ServerException,
        ResponseStatus::NoProcessor,
        ResponseStatus::Timeout,
        ResponseStatus::ConnectionClosed,
    ])
}

fn command_strategy(version: ProtocolVersion) -> impl Strategy<Value = Command> {
    let payload = prop::collection::vec(any::<u8>(), 0..512).prop_map(Bytes::from);
    (0u8..4, any::<u32>(), any::<u8>(), any::<u32>(), payload, status_strategy()).prop_map(
        move |(kind, id, serializer, timeout, payload, status)| {
            let request = Command::request(id, PROTOCOL_CODE, version, serializer, timeout, payload.clone());
            match kind {
                0 => request,
                1 => Command::oneway(id, PROTOCOL_CODE, version, serializer, payload),
                2 => Command::heartbeat(id, PROTOCOL_CODE, version, timeout),
                _ => request.response_to(status, payload),
            }
        },
    )
}

fn commands_strategy() -> impl Strategy<Value = Vec<Command>> {
    prop_oneof![Just(PROTOCOL_VERSION_1), Just(PROTOCOL_VERSION_2)]
        .prop_flat_map(|version| prop::collection::vec(command_strategy(version), 1..=20))
}

/// Feeds `wire` to a fresh negotiating codec in chunks of the given sizes,
/// cycling through `chunks` until the stream is exhausted.
fn decode_in_chunks(wire: &[u8], chunks: &[usize]) -> Vec<Command> {
    let mut codec = ProtocolCodec::negotiating(registry());
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut sizes = chunks.iter().cycle();
    while offset < wire.len() {
        let size = (*sizes.next().unwrap()).min(wire.len() - offset);
        buf.extend_from_slice(&wire[offset..offset + size]);
        offset += size;
        while let Some(command) = codec.decode(&mut buf).unwrap() {
            decoded.push(command);
        }
    }
    assert!(buf.is_empty(), "no bytes may remain after the last frame");
    decoded
}

fn two_frame_stream() -> (Vec<Command>, BytesMut) {
    let protocol = rpc_protocol();
    let request = Command::request(7, PROTOCOL_CODE, PROTOCOL_VERSION_1, 1, 3000, Bytes::from_static(b"hello"));
    let response = Command::request(8, PROTOCOL_CODE, PROTOCOL_VERSION_2, 1, 3000, Bytes::new())
        .response_to(ResponseStatus::ServerException, Bytes::from_static(b"boom"));
    let commands = vec![request, response];
    let mut wire = BytesMut::new();
    for command in &commands {
        protocol.encoder().encode(command, &mut wire).unwrap();
    }
    (commands, wire)
}

#[test]
fn test_byte_at_a_time_matches_single_shot_decode() {
    let (commands, wire) = two_frame_stream();

    let mut whole = wire.clone();
    let mut codec = ProtocolCodec::negotiating(registry());
    let mut single_shot = Vec::new();
    while let Some(command) = codec.decode(&mut whole).unwrap() {
        single_shot.push(command);
    }

    let byte_at_a_time = decode_in_chunks(&wire, &[1]);
    assert_eq!(byte_at_a_time, single_shot);
    assert_eq!(single_shot, commands);
}

#[test]
fn test_framed_reader_over_one_byte_reads() {
    let (commands, wire) = two_frame_stream();
    let mut builder = tokio_test::io::Builder::new();
    for byte in wire.iter() {
        builder.read(std::slice::from_ref(byte));
    }
    let reader = FramedRead::new(builder.build(), ProtocolCodec::negotiating(registry()));

    let decoded: Vec<Command> = tokio_test::block_on(reader.map(Result::unwrap).collect());
    assert_eq!(decoded, commands);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_fragmented_stream_decodes_every_command_in_order(
        commands in commands_strategy(),
        chunks in prop::collection::vec(1usize..64, 1..8)
    ) {
        let protocol = rpc_protocol();
        let mut wire = BytesMut::new();
        for command in &commands {
            protocol.encoder().encode(command, &mut wire).unwrap();
        }

        let decoded = decode_in_chunks(&wire, &chunks);
        prop_assert_eq!(decoded, commands);
    }

    #[test]
    fn test_single_flipped_bit_in_v2_frame_never_yields_a_wrong_command(
        id in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
        bit in any::<prop::sample::Index>()
    ) {
        let protocol = rpc_protocol();
        let command = Command::request(id, PROTOCOL_CODE, PROTOCOL_VERSION_2, 1, 1000, Bytes::from(payload));
        let mut wire = BytesMut::new();
        protocol.encoder().encode(&command, &mut wire).unwrap();

        // Leave the header alone so the frame length stays intact.
        let body_bits = (wire.len() - 16) * 8;
        let flip = 16 * 8 + bit.index(body_bits);
        wire[flip / 8] ^= 1 << (flip % 8);

        let mut codec = ProtocolCodec::negotiating(registry());
        let result = codec.decode(&mut wire);
        prop_assert!(result.is_err(), "corrupted frame decoded as {:?}", result);
    }

    #[test]
    fn test_garbage_input_never_panics(
        garbage in prop::collection::vec(any::<u8>(), 0..2048)
    ) {
        let mut codec = ProtocolCodec::negotiating(registry());
        let mut buf = BytesMut::from(&garbage[..]);
        for _ in 0..64 {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
}
