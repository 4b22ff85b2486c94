// src/connection/mod.rs

//! Manages the lifecycle of a single connection: the channel it writes to, its
//! session state and invoke-future table, and the read loop that feeds it.

mod channel;
mod conn;
mod guard;
mod handler;
mod heartbeat;
mod lease;
mod registry;
mod tcp_channel;

pub use channel::{Channel, MemoryChannel};
pub use conn::{Attribute, Connection};
pub use guard::ConnectionGuard;
pub use handler::{ConnectionHandler, IdlePolicy};
pub use heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT, HeartbeatTrigger};
pub use lease::ConnectionLease;
pub use registry::ConnectionRegistry;
pub use tcp_channel::TcpChannel;
