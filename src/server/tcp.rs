// src/server/tcp.rs

//! The TCP `ServerTransport`.

use super::context::ServerContext;
use super::{RemotingServer, ServerTransport, connection_loop};
use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::core::RemotingError;
use crate::core::protocol::ProtocolRegistry;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, lookup_host};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ACCEPT_LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Listens on `host:port` and serves every protocol in the registry.
pub struct TcpTransport {
    config: Arc<Config>,
    protocols: Arc<ProtocolRegistry>,
    connections: Arc<ConnectionRegistry>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(config: Arc<Config>, protocols: Arc<ProtocolRegistry>) -> Self {
        Self {
            config,
            protocols,
            connections: Arc::new(ConnectionRegistry::new()),
            shutdown_tx: None,
            accept_task: None,
            local_addr: None,
        }
    }

    /// The bound address while the transport is serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The live inbound connections, keyed by `ip:port`.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }
}

#[async_trait]
impl ServerTransport for TcpTransport {
    async fn do_init(&mut self) -> Result<(), RemotingError> {
        self.config
            .validate()
            .map_err(|e| RemotingError::Config(e.to_string()))?;
        if self.protocols.is_empty() {
            return Err(RemotingError::Config("no protocol is registered".into()));
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    async fn do_start(&mut self) -> Result<bool, RemotingError> {
        let shutdown_tx = self
            .shutdown_tx
            .clone()
            .ok_or_else(|| RemotingError::Internal("transport was not initialized".into()))?;
        let transport = &self.config.transport;
        let addr = lookup_host((self.config.host.as_str(), self.config.port))
            .await?
            .next()
            .ok_or_else(|| RemotingError::Config(format!("cannot resolve host '{}'", self.config.host)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(transport.so_reuseaddr)?;
        socket.set_keepalive(transport.so_keepalive)?;
        socket.bind(addr)?;
        let listener = socket.listen(transport.so_backlog)?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {} (backlog {})", local_addr, transport.so_backlog);

        let ctx = ServerContext {
            config: self.config.clone(),
            listener,
            protocols: self.protocols.clone(),
            connections: self.connections.clone(),
            shutdown_tx,
        };
        self.accept_task = Some(tokio::spawn(connection_loop::run(ctx)));
        self.local_addr = Some(local_addr);
        Ok(true)
    }

    async fn do_stop(&mut self) -> bool {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        let closed = self.connections.close_all();
        debug!("Closed {} connections on stop", closed);

        if let Some(task) = self.accept_task.take() {
            join_or_abort(task, ACCEPT_LOOP_STOP_TIMEOUT).await;
        }
        self.local_addr = None;
        true
    }
}

/// A TCP server for `config.host:config.port`.
pub fn tcp_server(
    config: Arc<Config>,
    protocols: Arc<ProtocolRegistry>,
) -> RemotingServer<TcpTransport> {
    let (host, port) = (config.host.clone(), config.port);
    RemotingServer::new(host, port, TcpTransport::new(config, protocols))
}

/// Waits up to `timeout` for `task` to finish, aborting it otherwise. Returns
/// whether it finished on its own.
async fn join_or_abort(mut task: JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            warn!("Timed out waiting for the accept loop to stop, aborting it.");
            task.abort();
            false
        }
    }
}
