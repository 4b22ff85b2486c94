// src/server/connection_loop.rs

//! Contains the accept loop of the TCP transport.

use super::context::ServerContext;
use crate::connection::{ConnectionHandler, IdlePolicy, TcpChannel};
use crate::core::metrics;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Accepts connections until the shutdown signal fires, then waits for the
/// connection handlers to finish.
pub async fn run(ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    let idle = if ctx.config.connection.tcp_idle_switch {
        IdlePolicy::Close(ctx.config.connection.server_idle_timeout)
    } else {
        IdlePolicy::Disabled
    };

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, no longer accepting connections.");
                break;
            }

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new connection from: {}", addr);
                        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();

                        if let Err(e) = socket.set_nodelay(ctx.config.transport.tcp_nodelay) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let local = match socket.local_addr() {
                            Ok(local) => local,
                            Err(e) => {
                                warn!("Dropping connection from {}: {}", addr, e);
                                continue;
                            }
                        };
                        let (reader, writer) = socket.into_split();
                        let channel = TcpChannel::spawn(writer, addr, local, &ctx.config.transport);
                        let kill_rx = channel.subscribe_kill();
                        let handler = ConnectionHandler::server(
                            reader,
                            channel,
                            ctx.protocols.clone(),
                            ctx.connections.clone(),
                            kill_rx,
                            ctx.shutdown_tx.subscribe(),
                            idle.clone(),
                        );
                        client_tasks.spawn(async move {
                            if let Err(e) = handler.run().await {
                                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection handler panicked: {e:?}");
                }
            }
        }
    }

    debug!("Waiting for {} connection handlers to finish", client_tasks.len());
    if tokio::time::timeout(Duration::from_secs(5), async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for connection handlers, aborting them.");
        client_tasks.shutdown().await;
    }
    info!("Accept loop stopped.");
}
