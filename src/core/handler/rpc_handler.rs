// src/core/handler/rpc_handler.rs

use super::{CommandHandler, RemotingContext, RequestProcessor};
use crate::connection::Connection;
use crate::core::metrics;
use crate::core::{Command, CommandKind, RemotingError, ResponseStatus};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// The command handler of the RPC protocol.
///
/// Requests are processed on their own task so the connection's read loop is
/// never blocked by application code. Responses are correlated with the
/// outstanding `InvokeFuture` of the same id.
#[derive(Default)]
pub struct RpcCommandHandler {
    processor: RwLock<Option<Arc<dyn RequestProcessor>>>,
}

impl RpcCommandHandler {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_processor(processor: Arc<dyn RequestProcessor>) -> Self {
        Self {
            processor: RwLock::new(Some(processor)),
        }
    }

    pub fn set_processor(&self, processor: Arc<dyn RequestProcessor>) {
        *self.processor.write() = Some(processor);
    }

    fn handle_request(&self, conn: &Arc<Connection>, request: Command) {
        let ctx = RemotingContext::new(conn.clone(), &request);
        let processor = self.processor.read().clone();
        tokio::spawn(async move {
            if ctx.is_request_timeout() {
                metrics::REQUESTS_DISCARDED_TOTAL.inc();
                warn!(
                    "Discarding request {} from {}: its timeout already elapsed",
                    request.invoke_id(),
                    ctx.connection.remote_string()
                );
                return;
            }

            let timer = metrics::REQUEST_LATENCY_SECONDS.start_timer();
            let (status, payload) = match &processor {
                None => (ResponseStatus::NoProcessor, Bytes::new()),
                Some(processor) => match processor.process(&ctx, &request).await {
                    Ok(payload) => (ResponseStatus::Success, payload),
                    Err(e) => {
                        warn!("Processor failed on request {}: {}", request.invoke_id(), e);
                        (ResponseStatus::ServerException, Bytes::from(e.to_string()))
                    }
                },
            };
            timer.observe_duration();

            if ctx.oneway {
                return;
            }
            let response = request.response_to(status, payload);
            if let Err(e) = ctx.connection.send(&response) {
                warn!(
                    "Failed to answer request {} to {}: {}",
                    request.invoke_id(),
                    ctx.connection.remote_string(),
                    e
                );
                Self::handle_send_failure(&ctx.connection, &request, e).await;
            }
        });
    }

    /// An encode failure writes nothing, so the caller still gets a
    /// `CodecException` answer. Anything else goes to `handle_exception`.
    async fn handle_send_failure(conn: &Arc<Connection>, request: &Command, error: RemotingError) {
        let error = match error {
            RemotingError::Protocol(message) => {
                let fallback = request.response_to(ResponseStatus::CodecException, Bytes::from(message));
                match conn.send(&fallback) {
                    Ok(()) => return,
                    Err(e) => e,
                }
            }
            other => other,
        };
        conn.protocol().command_handler().handle_exception(conn, error).await;
    }

    fn handle_response(&self, conn: &Arc<Connection>, response: Command) {
        let invoke_id = response.invoke_id();
        match conn.remove_invoke_future(invoke_id) {
            Some(future) => {
                future.cancel_timeout();
                future.put_response(Ok(response));
                future.execute_invoke_callback();
            }
            None => warn!(
                "Cannot find invoke future for id {} from {}, maybe already timeout",
                invoke_id,
                conn.remote_string()
            ),
        }
    }
}

#[async_trait]
impl CommandHandler for RpcCommandHandler {
    async fn handle_command(
        &self,
        conn: &Arc<Connection>,
        command: Command,
    ) -> Result<(), RemotingError> {
        match command.kind() {
            CommandKind::Request | CommandKind::Oneway => self.handle_request(conn, command),
            CommandKind::Heartbeat => {
                debug!("Heartbeat {} received from {}", command.invoke_id(), conn.remote_string());
                let ack = command.response_to(ResponseStatus::Success, Bytes::new());
                conn.send(&ack)?;
            }
            CommandKind::Response | CommandKind::HeartbeatAck => {
                self.handle_response(conn, command)
            }
        }
        Ok(())
    }

    async fn handle_exception(&self, conn: &Arc<Connection>, error: RemotingError) {
        if error.is_connection_fatal() {
            warn!("Closing connection {} after error: {}", conn.remote_string(), error);
            conn.close();
        } else {
            warn!("Error on connection {}: {}", conn.remote_string(), error);
        }
    }
}
