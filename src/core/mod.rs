// src/core/mod.rs

//! The central module containing the protocol, correlation and dispatch logic
//! of the remoting core.

pub mod command;
pub mod errors;
pub mod handler;
pub mod invoke;
pub mod metrics;
pub mod protocol;

pub use command::{Command, CommandKind, InvokeId, ProtocolCode, ProtocolVersion, ResponseStatus};
pub use errors::RemotingError;
