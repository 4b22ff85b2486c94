// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the read side of a connection.

use super::guard::ConnectionGuard;
use super::heartbeat::HeartbeatTrigger;
use super::{Channel, Connection, ConnectionRegistry};
use crate::core::protocol::{ProtocolCodec, ProtocolRegistry};
use crate::core::{Command, RemotingError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tokio::time::error::Elapsed;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// What the read loop does after a period without inbound frames.
#[derive(Clone)]
pub enum IdlePolicy {
    Disabled,
    /// Close the connection (server side).
    Close(Duration),
    /// Send a heartbeat (client side).
    Heartbeat {
        idle: Duration,
        trigger: Arc<HeartbeatTrigger>,
    },
}

impl IdlePolicy {
    fn timeout(&self) -> Option<Duration> {
        match self {
            IdlePolicy::Disabled => None,
            IdlePolicy::Close(idle) => Some(*idle),
            IdlePolicy::Heartbeat { idle, .. } => Some(*idle),
        }
    }
}

/// The next step for the read loop to take.
enum NextAction {
    Continue,
    ExitLoop,
}

/// Reads frames from one socket and dispatches them to the protocol's
/// command handler until the peer hangs up, the channel is killed, or the
/// server shuts down.
pub struct ConnectionHandler<R> {
    frames: FramedRead<R, ProtocolCodec>,
    channel: Arc<dyn Channel>,
    connection: Option<Arc<Connection>>,
    registry: Option<Arc<ConnectionRegistry>>,
    guard: Option<ConnectionGuard>,
    kill_rx: broadcast::Receiver<()>,
    global_shutdown_rx: Option<broadcast::Receiver<()>>,
    idle: IdlePolicy,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// An inbound handler. The `Connection` is created once the first frame has
    /// negotiated the protocol, and tracked in `registry` under `ip:port`.
    pub fn server(
        reader: R,
        channel: Arc<dyn Channel>,
        protocols: Arc<ProtocolRegistry>,
        registry: Arc<ConnectionRegistry>,
        kill_rx: broadcast::Receiver<()>,
        global_shutdown_rx: broadcast::Receiver<()>,
        idle: IdlePolicy,
    ) -> Self {
        Self {
            frames: FramedRead::new(reader, ProtocolCodec::negotiating(protocols)),
            channel,
            connection: None,
            registry: Some(registry),
            guard: None,
            kill_rx,
            global_shutdown_rx: Some(global_shutdown_rx),
            idle,
        }
    }

    /// An outbound handler for a connection whose protocol is already known.
    pub fn client(
        reader: R,
        connection: Arc<Connection>,
        kill_rx: broadcast::Receiver<()>,
        idle: IdlePolicy,
    ) -> Self {
        let guard = ConnectionGuard::new(None, connection.remote_string(), connection.clone());
        Self {
            frames: FramedRead::new(reader, ProtocolCodec::bound(connection.protocol().clone())),
            channel: connection.channel().clone(),
            connection: Some(connection),
            registry: None,
            guard: Some(guard),
            kill_rx,
            global_shutdown_rx: None,
            idle,
        }
    }

    /// The main read loop. Always closes the connection before returning.
    pub async fn run(mut self) -> Result<(), RemotingError> {
        let remote = self
            .channel
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let idle_timeout = self.idle.timeout();

        'main_loop: loop {
            tokio::select! {
                // Prioritize shutdown signals over inbound frames.
                biased;
                _ = wait_for_shutdown(&mut self.global_shutdown_rx) => {
                    info!("Connection handler for {} received shutdown signal.", remote);
                    break 'main_loop;
                }
                _ = self.kill_rx.recv() => {
                    debug!("Connection handler for {} received kill signal.", remote);
                    break 'main_loop;
                }
                result = next_frame(&mut self.frames, idle_timeout) => {
                    let action = match result {
                        Err(_) => self.on_idle(&remote),
                        Ok(Some(Ok(command))) => self.on_command(command).await,
                        Ok(Some(Err(e))) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", remote, e);
                                NextAction::ExitLoop
                            } else {
                                self.on_error(e).await
                            }
                        }
                        Ok(None) => {
                            debug!("Connection from {} closed by peer.", remote);
                            NextAction::ExitLoop
                        }
                    };
                    if let NextAction::ExitLoop = action {
                        break 'main_loop;
                    }
                }
            }
        }

        match &self.connection {
            Some(conn) => conn.close(),
            None => {
                if let Err(e) = self.channel.close() {
                    warn!("Failed to close channel to {}: {}", remote, e);
                }
            }
        }
        drop(self.guard.take());
        Ok(())
    }

    async fn on_command(&mut self, command: Command) -> NextAction {
        let conn = match self.bind_connection(&command) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Cannot bind a connection for inbound frame: {}", e);
                return NextAction::ExitLoop;
            }
        };
        if command.protocol_version() != conn.protocol_version() {
            let error = RemotingError::Protocol(format!(
                "frame version {} does not match connection version {}",
                command.protocol_version(),
                conn.protocol_version()
            ));
            return self.on_error(error).await;
        }

        let handler = conn.protocol().command_handler();
        match handler.handle_command(&conn, command).await {
            Ok(()) => NextAction::Continue,
            Err(e) => self.on_error(e).await,
        }
    }

    async fn on_error(&mut self, error: RemotingError) -> NextAction {
        let fatal = error.is_connection_fatal();
        match &self.connection {
            Some(conn) => {
                let handler = conn.protocol().command_handler();
                handler.handle_exception(conn, error).await;
            }
            None => warn!("Error before the protocol was negotiated: {}", error),
        }
        if fatal {
            NextAction::ExitLoop
        } else {
            NextAction::Continue
        }
    }

    fn on_idle(&self, remote: &str) -> NextAction {
        match &self.idle {
            IdlePolicy::Disabled => NextAction::Continue,
            IdlePolicy::Close(idle) => {
                info!("Connection {} idle for {:?}, closing it.", remote, idle);
                NextAction::ExitLoop
            }
            IdlePolicy::Heartbeat { trigger, .. } => {
                if let Some(conn) = &self.connection {
                    trigger.heartbeat_triggered(conn);
                }
                // A close by the trigger fires the kill signal.
                NextAction::Continue
            }
        }
    }

    /// Returns the connection, creating it from the negotiated protocol and the
    /// first frame's version on a fresh inbound stream.
    fn bind_connection(&mut self, first: &Command) -> Result<Arc<Connection>, RemotingError> {
        if let Some(conn) = &self.connection {
            return Ok(conn.clone());
        }
        let protocol = self
            .frames
            .decoder()
            .protocol()
            .cloned()
            .ok_or_else(|| RemotingError::Internal("no protocol was negotiated".into()))?;
        let conn = Arc::new(Connection::new(
            self.channel.clone(),
            protocol,
            first.protocol_version(),
        ));
        let pool_key = conn.remote_string();
        conn.add_pool_key(pool_key.clone());
        self.guard = Some(ConnectionGuard::new(
            self.registry.clone(),
            pool_key,
            conn.clone(),
        ));
        debug!(
            "Bound connection {} to protocol {} {}",
            conn.remote_string(),
            conn.protocol_code(),
            conn.protocol_version()
        );
        self.connection = Some(conn.clone());
        Ok(conn)
    }
}

async fn next_frame<R: AsyncRead + Unpin>(
    frames: &mut FramedRead<R, ProtocolCodec>,
    idle: Option<Duration>,
) -> Result<Option<Result<Command, RemotingError>>, Elapsed> {
    match idle {
        Some(idle) => tokio::time::timeout(idle, frames.next()).await,
        None => Ok(frames.next().await),
    }
}

async fn wait_for_shutdown(rx: &mut Option<broadcast::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Checks if an error represents a normal client disconnection.
fn is_normal_disconnect(e: &RemotingError) -> bool {
    if let RemotingError::Io(io_err) = e {
        matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::UnexpectedEof
        )
    } else {
        false
    }
}
