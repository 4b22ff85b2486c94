// src/core/errors.rs

//! Defines the primary error type for the remoting core.

use crate::core::command::ResponseStatus;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the transport and session
/// layers can surface to a caller.
#[derive(Error, Debug)]
pub enum RemotingError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// A malformed frame or a corrupt stream. Fatal to the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The first byte of a stream named a protocol nobody registered.
    #[error("Unsupported protocol code {0}")]
    UnsupportedProtocol(u8),

    /// A second future was registered under an id that is still in flight.
    #[error("Invocation id {0} is already registered on this connection")]
    InvocationIdCollision(u32),

    #[error("Invocation {invoke_id} to {remote} timed out")]
    Timeout { invoke_id: u32, remote: String },

    #[error("Connection to {remote} was closed")]
    ConnectionClosed { remote: String },

    #[error("Connection is not fine: {0}")]
    ConnectionNotFine(String),

    #[error("Failed to send command: {0}")]
    SendFailed(String),

    #[error("Write buffer is above the high watermark")]
    WriteBufferFull,

    #[error("Server answered with {status}: {message}")]
    ServerResponse {
        status: ResponseStatus,
        message: String,
    },

    #[error("No processor is registered for this request")]
    NoProcessor,

    #[error("Failed to start the server: {0}")]
    ServerStart(String),

    #[error("The server has already started")]
    AlreadyStarted,

    #[error("The server has already stopped")]
    AlreadyStopped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl RemotingError {
    /// Returns true for errors after which the stream can no longer be trusted.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RemotingError::Protocol(_) | RemotingError::UnsupportedProtocol(_) | RemotingError::Io(_)
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for RemotingError {
    fn clone(&self) -> Self {
        match self {
            RemotingError::Io(e) => RemotingError::Io(Arc::clone(e)),
            RemotingError::Protocol(s) => RemotingError::Protocol(s.clone()),
            RemotingError::UnsupportedProtocol(c) => RemotingError::UnsupportedProtocol(*c),
            RemotingError::InvocationIdCollision(id) => RemotingError::InvocationIdCollision(*id),
            RemotingError::Timeout { invoke_id, remote } => RemotingError::Timeout {
                invoke_id: *invoke_id,
                remote: remote.clone(),
            },
            RemotingError::ConnectionClosed { remote } => RemotingError::ConnectionClosed {
                remote: remote.clone(),
            },
            RemotingError::ConnectionNotFine(s) => RemotingError::ConnectionNotFine(s.clone()),
            RemotingError::SendFailed(s) => RemotingError::SendFailed(s.clone()),
            RemotingError::WriteBufferFull => RemotingError::WriteBufferFull,
            RemotingError::ServerResponse { status, message } => RemotingError::ServerResponse {
                status: *status,
                message: message.clone(),
            },
            RemotingError::NoProcessor => RemotingError::NoProcessor,
            RemotingError::ServerStart(s) => RemotingError::ServerStart(s.clone()),
            RemotingError::AlreadyStarted => RemotingError::AlreadyStarted,
            RemotingError::AlreadyStopped => RemotingError::AlreadyStopped,
            RemotingError::Config(s) => RemotingError::Config(s.clone()),
            RemotingError::Internal(s) => RemotingError::Internal(s.clone()),
        }
    }
}

impl PartialEq for RemotingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RemotingError::Io(e1), RemotingError::Io(e2)) => e1.kind() == e2.kind(),
            (RemotingError::Protocol(s1), RemotingError::Protocol(s2)) => s1 == s2,
            (RemotingError::UnsupportedProtocol(c1), RemotingError::UnsupportedProtocol(c2)) => {
                c1 == c2
            }
            (
                RemotingError::InvocationIdCollision(i1),
                RemotingError::InvocationIdCollision(i2),
            ) => i1 == i2,
            (
                RemotingError::Timeout {
                    invoke_id: i1,
                    remote: r1,
                },
                RemotingError::Timeout {
                    invoke_id: i2,
                    remote: r2,
                },
            ) => i1 == i2 && r1 == r2,
            (
                RemotingError::ConnectionClosed { remote: r1 },
                RemotingError::ConnectionClosed { remote: r2 },
            ) => r1 == r2,
            (RemotingError::ConnectionNotFine(s1), RemotingError::ConnectionNotFine(s2)) => {
                s1 == s2
            }
            (RemotingError::SendFailed(s1), RemotingError::SendFailed(s2)) => s1 == s2,
            (
                RemotingError::ServerResponse {
                    status: s1,
                    message: m1,
                },
                RemotingError::ServerResponse {
                    status: s2,
                    message: m2,
                },
            ) => s1 == s2 && m1 == m2,
            (RemotingError::ServerStart(s1), RemotingError::ServerStart(s2)) => s1 == s2,
            (RemotingError::Config(s1), RemotingError::Config(s2)) => s1 == s2,
            (RemotingError::Internal(s1), RemotingError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RemotingError {
    fn from(e: std::io::Error) -> Self {
        RemotingError::Io(Arc::new(e))
    }
}

impl From<tokio::time::error::Elapsed> for RemotingError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        RemotingError::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            e.to_string(),
        )))
    }
}

impl From<config::ConfigError> for RemotingError {
    fn from(e: config::ConfigError) -> Self {
        RemotingError::Config(e.to_string())
    }
}
