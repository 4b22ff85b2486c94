// src/server/context.rs

use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::core::protocol::ProtocolRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Holds everything the accept loop needs to serve connections.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub listener: TcpListener,
    pub protocols: Arc<ProtocolRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub shutdown_tx: broadcast::Sender<()>,
}
