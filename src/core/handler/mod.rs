// src/core/handler/mod.rs

//! Dispatch of decoded commands: the per-protocol `CommandHandler` and the
//! application-supplied `RequestProcessor` it delegates requests to.

mod rpc_handler;

pub use rpc_handler::RpcCommandHandler;

use crate::connection::Connection;
use crate::core::{Command, RemotingError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handles every command a protocol decodes, and the errors raised while
/// decoding or dispatching them.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(
        &self,
        conn: &Arc<Connection>,
        command: Command,
    ) -> Result<(), RemotingError>;

    async fn handle_exception(&self, conn: &Arc<Connection>, error: RemotingError);
}

/// Application logic that turns a request payload into a response payload.
///
/// An `Err` is answered with a `ServerException` status carrying the error text.
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(&self, ctx: &RemotingContext, request: &Command)
    -> Result<Bytes, RemotingError>;
}

/// Per-request information handed to a `RequestProcessor`.
pub struct RemotingContext {
    pub connection: Arc<Connection>,
    pub arrived_at: Instant,
    pub timeout: Option<Duration>,
    pub oneway: bool,
}

impl RemotingContext {
    pub fn new(connection: Arc<Connection>, request: &Command) -> Self {
        let timeout = match request.timeout_ms() {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        };
        Self {
            connection,
            arrived_at: Instant::now(),
            timeout,
            oneway: request.kind() == crate::core::CommandKind::Oneway,
        }
    }

    /// True once the caller's timeout has elapsed since the request arrived.
    pub fn is_request_timeout(&self) -> bool {
        self.timeout
            .is_some_and(|timeout| self.arrived_at.elapsed() > timeout)
    }
}
