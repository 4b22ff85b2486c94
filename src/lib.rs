// src/lib.rs

pub mod client;
pub mod config;
pub mod connection;
pub mod core;
pub mod server;

// Re-export the types most callers need.
pub use crate::client::{ConnectionFactory, ConnectionUrl};
pub use crate::connection::Connection;
pub use crate::core::{Command, RemotingError};
pub use crate::server::{RemotingServer, TcpTransport, tcp_server};
