// src/client/factory.rs

//! Dials outbound TCP connections and starts their read loops.

use super::ConnectionUrl;
use crate::config::Config;
use crate::connection::{
    Connection, ConnectionHandler, DEFAULT_HEARTBEAT_TIMEOUT, HeartbeatTrigger, IdlePolicy,
    TcpChannel,
};
use crate::core::invoke::RemotingInvoker;
use crate::core::metrics;
use crate::core::protocol::ProtocolRegistry;
use crate::core::RemotingError;
use std::sync::Arc;
use tokio::net::{TcpSocket, lookup_host};
use tracing::{info, warn};

/// Creates client connections bound to a protocol from the registry.
pub struct ConnectionFactory {
    config: Arc<Config>,
    protocols: Arc<ProtocolRegistry>,
    invoker: Arc<RemotingInvoker>,
}

impl ConnectionFactory {
    pub fn new(
        config: Arc<Config>,
        protocols: Arc<ProtocolRegistry>,
        invoker: Arc<RemotingInvoker>,
    ) -> Self {
        Self {
            config,
            protocols,
            invoker,
        }
    }

    pub fn invoker(&self) -> &Arc<RemotingInvoker> {
        &self.invoker
    }

    /// Connects to `url` and spawns the connection's read loop.
    pub async fn connect(&self, url: &ConnectionUrl) -> Result<Arc<Connection>, RemotingError> {
        let protocol = self.protocols.get(url.protocol_code)?;
        if !protocol.supports_version(url.protocol_version) {
            return Err(RemotingError::Protocol(format!(
                "protocol {} does not support version {}",
                url.protocol_code, url.protocol_version
            )));
        }

        let addr = lookup_host(url.unique_key())
            .await?
            .next()
            .ok_or_else(|| RemotingError::ConnectionNotFine(format!("cannot resolve {}", url.unique_key())))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(self.config.transport.so_keepalive)?;

        let stream = tokio::time::timeout(url.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| {
                RemotingError::ConnectionNotFine(format!(
                    "connect to {} timed out after {:?}",
                    addr, url.connect_timeout
                ))
            })??;
        stream.set_nodelay(self.config.transport.tcp_nodelay)?;
        let local = stream.local_addr()?;
        let (reader, writer) = stream.into_split();

        let channel = TcpChannel::spawn(writer, addr, local, &self.config.transport);
        let kill_rx = channel.subscribe_kill();
        let conn = Arc::new(Connection::with_url(
            channel,
            protocol,
            url.protocol_version,
            url.clone(),
        ));

        let idle = if self.config.connection.tcp_idle_switch {
            IdlePolicy::Heartbeat {
                idle: self.config.connection.client_idle_timeout,
                trigger: Arc::new(HeartbeatTrigger::new(
                    self.invoker.clone(),
                    self.config.connection.heartbeat_max_failures,
                    DEFAULT_HEARTBEAT_TIMEOUT,
                )),
            }
        } else {
            IdlePolicy::Disabled
        };
        let handler = ConnectionHandler::client(reader, conn.clone(), kill_rx, idle);
        tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                warn!("Connection to {} terminated unexpectedly: {}", addr, e);
            }
        });

        metrics::CONNECTIONS_CREATED_TOTAL.inc();
        info!("Connected to {} from {}", addr, local);
        Ok(conn)
    }
}
