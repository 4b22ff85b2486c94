// src/core/protocol/mod.rs

//! The codec contract, the protocol registry and the built-in RPC protocol.

pub mod codec;
pub mod registry;
pub mod rpc;

pub use codec::{CommandDecoder, CommandEncoder, ProtocolCodec};
pub use registry::ProtocolRegistry;
pub use rpc::RpcProtocol;

use crate::core::handler::CommandHandler;
use crate::core::{ProtocolCode, ProtocolVersion};
use std::sync::Arc;

/// A wire dialect: the encoder, decoder and command handler bound to one
/// protocol code.
pub trait Protocol: Send + Sync {
    /// The one-byte code that opens every frame of this protocol.
    fn code(&self) -> ProtocolCode;

    /// Whether frames of the given revision can be encoded and decoded.
    fn supports_version(&self, version: ProtocolVersion) -> bool;

    fn encoder(&self) -> &dyn CommandEncoder;

    fn decoder(&self) -> &dyn CommandDecoder;

    fn command_handler(&self) -> Arc<dyn CommandHandler>;
}
