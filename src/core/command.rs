// src/core/command.rs

//! Defines `Command`, the unit every codec produces and consumes, together with
//! the small value types that travel inside it.

use crate::core::RemotingError;
use bytes::Bytes;
use std::fmt;
use strum_macros::{Display, EnumIter};

/// The correlation key shared by a request and its response on one connection.
pub type InvokeId = u32;

/// Identifies the wire dialect that governs a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolCode(pub u8);

impl fmt::Display for ProtocolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The revision of a protocol dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion(pub u8);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The type tag carried by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CommandKind {
    Response,
    Request,
    Oneway,
    Heartbeat,
    HeartbeatAck,
}

impl CommandKind {
    pub fn as_byte(self) -> u8 {
        match self {
            CommandKind::Response => 0,
            CommandKind::Request => 1,
            CommandKind::Oneway => 2,
            CommandKind::Heartbeat => 3,
            CommandKind::HeartbeatAck => 4,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CommandKind::Response),
            1 => Some(CommandKind::Request),
            2 => Some(CommandKind::Oneway),
            3 => Some(CommandKind::Heartbeat),
            4 => Some(CommandKind::HeartbeatAck),
            _ => None,
        }
    }

    /// True for kinds that complete an outstanding invoke future.
    pub fn is_response(self) -> bool {
        matches!(self, CommandKind::Response | CommandKind::HeartbeatAck)
    }
}

/// The outcome reported by a response command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ResponseStatus {
    Success,
    Error,
    ServerException,
    Unknown,
    ServerThreadpoolBusy,
    ErrorComm,
    NoProcessor,
    Timeout,
    ClientSendError,
    CodecException,
    ConnectionClosed,
    ServerSerialException,
    ServerDeserialException,
}

impl ResponseStatus {
    pub fn code(self) -> u16 {
        match self {
            ResponseStatus::Success => 0x0000,
            ResponseStatus::Error => 0x0001,
            ResponseStatus::ServerException => 0x0002,
            ResponseStatus::Unknown => 0x0003,
            ResponseStatus::ServerThreadpoolBusy => 0x0004,
            ResponseStatus::ErrorComm => 0x0005,
            ResponseStatus::NoProcessor => 0x0006,
            ResponseStatus::Timeout => 0x0007,
            ResponseStatus::ClientSendError => 0x0008,
            ResponseStatus::CodecException => 0x0009,
            ResponseStatus::ConnectionClosed => 0x0010,
            ResponseStatus::ServerSerialException => 0x0011,
            ResponseStatus::ServerDeserialException => 0x0012,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let status = match code {
            0x0000 => ResponseStatus::Success,
            0x0001 => ResponseStatus::Error,
            0x0002 => ResponseStatus::ServerException,
            0x0003 => ResponseStatus::Unknown,
            0x0004 => ResponseStatus::ServerThreadpoolBusy,
            0x0005 => ResponseStatus::ErrorComm,
            0x0006 => ResponseStatus::NoProcessor,
            0x0007 => ResponseStatus::Timeout,
            0x0008 => ResponseStatus::ClientSendError,
            0x0009 => ResponseStatus::CodecException,
            0x0010 => ResponseStatus::ConnectionClosed,
            0x0011 => ResponseStatus::ServerSerialException,
            0x0012 => ResponseStatus::ServerDeserialException,
            _ => return None,
        };
        Some(status)
    }
}

/// One decoded or to-be-encoded protocol message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    invoke_id: InvokeId,
    protocol_code: ProtocolCode,
    protocol_version: ProtocolVersion,
    serializer: u8,
    timeout_ms: u32,
    status: ResponseStatus,
    payload: Bytes,
}

impl Command {
    /// Assembles a command from its raw parts. Used by decoders.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        kind: CommandKind,
        invoke_id: InvokeId,
        protocol_code: ProtocolCode,
        protocol_version: ProtocolVersion,
        serializer: u8,
        timeout_ms: u32,
        status: ResponseStatus,
        payload: Bytes,
    ) -> Self {
        Self {
            kind,
            invoke_id,
            protocol_code,
            protocol_version,
            serializer,
            timeout_ms,
            status,
            payload,
        }
    }

    /// Builds a request that expects a response.
    pub fn request(
        invoke_id: InvokeId,
        protocol_code: ProtocolCode,
        protocol_version: ProtocolVersion,
        serializer: u8,
        timeout_ms: u32,
        payload: Bytes,
    ) -> Self {
        Self::from_parts(
            CommandKind::Request,
            invoke_id,
            protocol_code,
            protocol_version,
            serializer,
            timeout_ms,
            ResponseStatus::Success,
            payload,
        )
    }

    /// Builds a request that expects no response.
    pub fn oneway(
        invoke_id: InvokeId,
        protocol_code: ProtocolCode,
        protocol_version: ProtocolVersion,
        serializer: u8,
        payload: Bytes,
    ) -> Self {
        Self::from_parts(
            CommandKind::Oneway,
            invoke_id,
            protocol_code,
            protocol_version,
            serializer,
            0,
            ResponseStatus::Success,
            payload,
        )
    }

    pub fn heartbeat(
        invoke_id: InvokeId,
        protocol_code: ProtocolCode,
        protocol_version: ProtocolVersion,
        timeout_ms: u32,
    ) -> Self {
        Self::from_parts(
            CommandKind::Heartbeat,
            invoke_id,
            protocol_code,
            protocol_version,
            0,
            timeout_ms,
            ResponseStatus::Success,
            Bytes::new(),
        )
    }

    /// Builds the response to `self`, reusing its id, protocol and serializer.
    pub fn response_to(&self, status: ResponseStatus, payload: Bytes) -> Self {
        let kind = if self.kind == CommandKind::Heartbeat {
            CommandKind::HeartbeatAck
        } else {
            CommandKind::Response
        };
        Self::from_parts(
            kind,
            self.invoke_id,
            self.protocol_code,
            self.protocol_version,
            self.serializer,
            0,
            status,
            payload,
        )
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn invoke_id(&self) -> InvokeId {
        self.invoke_id
    }

    pub fn protocol_code(&self) -> ProtocolCode {
        self.protocol_code
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn serializer(&self) -> u8 {
        self.serializer
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Converts a response into its payload, or into an error for any status
    /// other than `Success`. The payload of a failed response is read as the
    /// server's error message.
    pub fn into_result(self) -> Result<Bytes, RemotingError> {
        match self.status {
            ResponseStatus::Success => Ok(self.payload),
            ResponseStatus::NoProcessor => Err(RemotingError::NoProcessor),
            status => Err(RemotingError::ServerResponse {
                status,
                message: String::from_utf8_lossy(&self.payload).to_string(),
            }),
        }
    }
}
