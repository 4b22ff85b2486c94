// src/core/protocol/rpc.rs

//! Implements the built-in RPC protocol: its frame layout and the matching
//! `CommandEncoder` / `CommandDecoder`.
//!
//! Every frame starts with a fixed 16 byte big-endian header:
//!
//! ```text
//! +------+---------+------+------------+-----------+------+-------------+---------+---------+
//! | code | version | kind | serializer | invoke id | aux  | payload len | payload | [crc32] |
//! |  u8  |   u8    |  u8  |     u8     |    u32    | u32  |     u32     |   N     |   u32   |
//! +------+---------+------+------------+-----------+------+-------------+---------+---------+
//! ```
//!
//! `aux` holds the timeout in milliseconds for requests and heartbeats, and the
//! response status code for responses and heartbeat acks. Version 2 frames end
//! with a CRC32 computed over the header and payload.

use super::{CommandDecoder, CommandEncoder, Protocol};
use crate::core::handler::CommandHandler;
use crate::core::{
    Command, CommandKind, ProtocolCode, ProtocolVersion, RemotingError, ResponseStatus,
};
use bytes::{Buf, BufMut, BytesMut};
use crc::{CRC_32_ISO_HDLC, Crc};
use std::sync::Arc;

pub const PROTOCOL_CODE: ProtocolCode = ProtocolCode(1);
pub const PROTOCOL_VERSION_1: ProtocolVersion = ProtocolVersion(1);
/// Adds a trailing CRC32 to every frame.
pub const PROTOCOL_VERSION_2: ProtocolVersion = ProtocolVersion(2);

pub const HEADER_LEN: usize = 16;
const CRC_LEN: usize = 4;

/// Default upper bound for a single payload (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn trailer_len(version: ProtocolVersion) -> Result<usize, RemotingError> {
    match version {
        PROTOCOL_VERSION_1 => Ok(0),
        PROTOCOL_VERSION_2 => Ok(CRC_LEN),
        other => Err(RemotingError::Protocol(format!(
            "unsupported rpc protocol version {other}"
        ))),
    }
}

/// The RPC protocol, registered under code `1`.
pub struct RpcProtocol {
    encoder: RpcCommandEncoder,
    decoder: RpcCommandDecoder,
    handler: Arc<dyn CommandHandler>,
}

impl RpcProtocol {
    pub fn new(handler: Arc<dyn CommandHandler>, max_frame_size: usize) -> Self {
        Self {
            encoder: RpcCommandEncoder { max_frame_size },
            decoder: RpcCommandDecoder { max_frame_size },
            handler,
        }
    }
}

impl Protocol for RpcProtocol {
    fn code(&self) -> ProtocolCode {
        PROTOCOL_CODE
    }

    fn supports_version(&self, version: ProtocolVersion) -> bool {
        trailer_len(version).is_ok()
    }

    fn encoder(&self) -> &dyn CommandEncoder {
        &self.encoder
    }

    fn decoder(&self) -> &dyn CommandDecoder {
        &self.decoder
    }

    fn command_handler(&self) -> Arc<dyn CommandHandler> {
        self.handler.clone()
    }
}

#[derive(Debug, Clone)]
pub struct RpcCommandEncoder {
    max_frame_size: usize,
}

impl CommandEncoder for RpcCommandEncoder {
    fn encode(&self, command: &Command, dst: &mut BytesMut) -> Result<(), RemotingError> {
        if command.protocol_code() != PROTOCOL_CODE {
            return Err(RemotingError::Protocol(format!(
                "cannot encode protocol {} with the rpc encoder",
                command.protocol_code()
            )));
        }
        let trailer = trailer_len(command.protocol_version())?;
        let payload = command.payload();
        if payload.len() > self.max_frame_size {
            return Err(RemotingError::Protocol(format!(
                "payload of {} bytes exceeds the maximum frame size {}",
                payload.len(),
                self.max_frame_size
            )));
        }

        let aux = if command.kind().is_response() {
            u32::from(command.status().code())
        } else {
            command.timeout_ms()
        };

        let start = dst.len();
        dst.reserve(HEADER_LEN + payload.len() + trailer);
        dst.put_u8(PROTOCOL_CODE.0);
        dst.put_u8(command.protocol_version().0);
        dst.put_u8(command.kind().as_byte());
        dst.put_u8(command.serializer());
        dst.put_u32(command.invoke_id());
        dst.put_u32(aux);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);

        if trailer > 0 {
            let checksum = CRC32.checksum(&dst[start..]);
            dst.put_u32(checksum);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RpcCommandDecoder {
    max_frame_size: usize,
}

impl CommandDecoder for RpcCommandDecoder {
    fn decode(&self, src: &mut BytesMut, out: &mut Vec<Command>) -> Result<(), RemotingError> {
        while src.len() >= HEADER_LEN {
            let mut header = &src[..HEADER_LEN];
            let code = header.get_u8();
            if code != PROTOCOL_CODE.0 {
                return Err(RemotingError::Protocol(format!(
                    "unexpected protocol code {code} in rpc stream"
                )));
            }
            let version = ProtocolVersion(header.get_u8());
            let trailer = trailer_len(version)?;
            let kind_byte = header.get_u8();
            let kind = CommandKind::from_byte(kind_byte).ok_or_else(|| {
                RemotingError::Protocol(format!("unknown command kind {kind_byte}"))
            })?;
            let serializer = header.get_u8();
            let invoke_id = header.get_u32();
            let aux = header.get_u32();
            let payload_len = header.get_u32() as usize;

            if payload_len > self.max_frame_size {
                return Err(RemotingError::Protocol(format!(
                    "frame length {} exceeds the maximum frame size {}",
                    payload_len, self.max_frame_size
                )));
            }

            let frame_len = HEADER_LEN + payload_len + trailer;
            if src.len() < frame_len {
                // Wait for the rest of the frame.
                src.reserve(frame_len - src.len());
                return Ok(());
            }

            let mut frame = src.split_to(frame_len);
            if trailer > 0 {
                let body_len = frame_len - CRC_LEN;
                let expected = (&frame[body_len..]).get_u32();
                let actual = CRC32.checksum(&frame[..body_len]);
                if expected != actual {
                    return Err(RemotingError::Protocol(format!(
                        "crc mismatch for invocation {invoke_id}: expected {expected:#010x}, got {actual:#010x}"
                    )));
                }
                frame.truncate(body_len);
            }
            let payload = frame.split_off(HEADER_LEN).freeze();

            let (timeout_ms, status) = if kind.is_response() {
                let status = u16::try_from(aux)
                    .ok()
                    .and_then(ResponseStatus::from_code)
                    .ok_or_else(|| {
                        RemotingError::Protocol(format!("unknown response status {aux}"))
                    })?;
                (0, status)
            } else {
                (aux, ResponseStatus::Success)
            };

            out.push(Command::from_parts(
                kind,
                invoke_id,
                ProtocolCode(code),
                version,
                serializer,
                timeout_ms,
                status,
                payload,
            ));
        }
        Ok(())
    }
}
