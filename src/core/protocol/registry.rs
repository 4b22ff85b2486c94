// src/core/protocol/registry.rs

//! Maps protocol codes to protocol implementations.

use super::Protocol;
use crate::core::{ProtocolCode, RemotingError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, warn};

/// The set of protocols a process can speak, keyed by their one-byte code.
///
/// Constructed explicitly and shared through an `Arc`; there is no process-wide
/// registry.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: DashMap<ProtocolCode, Arc<dyn Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a protocol under its own code. A code can only be taken once.
    pub fn register(&self, protocol: Arc<dyn Protocol>) -> Result<(), RemotingError> {
        let code = protocol.code();
        match self.protocols.entry(code) {
            Entry::Occupied(_) => {
                warn!("Protocol {} is already registered", code);
                Err(RemotingError::Internal(format!(
                    "protocol {code} is already registered"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(protocol);
                debug!("Registered protocol {}", code);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, code: ProtocolCode) -> Option<Arc<dyn Protocol>> {
        self.protocols.remove(&code).map(|(_, protocol)| protocol)
    }

    pub fn get(&self, code: ProtocolCode) -> Result<Arc<dyn Protocol>, RemotingError> {
        self.protocols
            .get(&code)
            .map(|entry| entry.value().clone())
            .ok_or(RemotingError::UnsupportedProtocol(code.0))
    }

    /// Selects the protocol announced by the first byte of a stream.
    pub fn negotiate(&self, first_byte: u8) -> Result<Arc<dyn Protocol>, RemotingError> {
        self.get(ProtocolCode(first_byte))
    }

    pub fn contains(&self, code: ProtocolCode) -> bool {
        self.protocols.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}
