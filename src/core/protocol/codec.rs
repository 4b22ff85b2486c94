// src/core/protocol/codec.rs

//! The codec contract and `ProtocolCodec`, the `tokio_util::codec` adapter that
//! negotiates the protocol of an inbound stream from its first byte.

use super::{Protocol, ProtocolRegistry};
use crate::core::{Command, RemotingError};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Serializes one command into a self-length-describing frame.
pub trait CommandEncoder: Send + Sync {
    fn encode(&self, command: &Command, dst: &mut BytesMut) -> Result<(), RemotingError>;
}

/// Decodes every complete frame available in `src`, appending the commands to
/// `out` in arrival order.
///
/// A trailing partial frame must be left in `src` untouched so decoding can
/// resume when more bytes arrive.
pub trait CommandDecoder: Send + Sync {
    fn decode(&self, src: &mut BytesMut, out: &mut Vec<Command>) -> Result<(), RemotingError>;
}

/// Frames a byte stream into `Command`s for one connection.
///
/// An inbound codec starts unbound and selects its protocol from the first byte
/// it sees; an outbound codec is bound up front. Either way the protocol never
/// changes afterwards.
pub struct ProtocolCodec {
    registry: Option<Arc<ProtocolRegistry>>,
    protocol: Option<Arc<dyn Protocol>>,
    decoded: VecDeque<Command>,
    // Raised by a frame that followed commands still queued in `decoded`.
    pending_error: Option<RemotingError>,
}

impl ProtocolCodec {
    /// A codec that negotiates its protocol from the first inbound byte.
    pub fn negotiating(registry: Arc<ProtocolRegistry>) -> Self {
        Self {
            registry: Some(registry),
            protocol: None,
            decoded: VecDeque::new(),
            pending_error: None,
        }
    }

    /// A codec fixed to a protocol chosen by configuration.
    pub fn bound(protocol: Arc<dyn Protocol>) -> Self {
        Self {
            registry: None,
            protocol: Some(protocol),
            decoded: VecDeque::new(),
            pending_error: None,
        }
    }

    /// The protocol governing this stream, once known.
    pub fn protocol(&self) -> Option<&Arc<dyn Protocol>> {
        self.protocol.as_ref()
    }

    fn select_protocol(&mut self, first_byte: u8) -> Result<Arc<dyn Protocol>, RemotingError> {
        if let Some(protocol) = &self.protocol {
            return Ok(protocol.clone());
        }
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| RemotingError::Internal("codec has no protocol registry".into()))?;
        let protocol = registry.negotiate(first_byte)?;
        debug!("Negotiated protocol {} for inbound stream", protocol.code());
        self.protocol = Some(protocol.clone());
        Ok(protocol)
    }
}

impl Decoder for ProtocolCodec {
    type Item = Command;
    type Error = RemotingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(command) = self.decoded.pop_front() {
            return Ok(Some(command));
        }
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let protocol = self.select_protocol(src[0])?;
        let mut out = Vec::new();
        let result = protocol.decoder().decode(src, &mut out);
        self.decoded.extend(out);
        if let Err(error) = result {
            if self.decoded.is_empty() {
                return Err(error);
            }
            self.pending_error = Some(error);
        }
        Ok(self.decoded.pop_front())
    }
}

impl Encoder<Command> for ProtocolCodec {
    type Error = RemotingError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let protocol = self.select_protocol(item.protocol_code().0)?;
        protocol.encoder().encode(&item, dst)
    }
}
