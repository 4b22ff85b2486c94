// src/server/mod.rs

//! The remoting server: a lifecycle state machine driving a pluggable
//! transport, and the TCP transport itself.

use crate::core::RemotingError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use strum_macros::Display;
use tracing::{error, info, warn};

mod connection_loop;
mod context;
mod tcp;

pub use tcp::{TcpTransport, tcp_server};

/// The lifecycle state of a `RemotingServer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum ServerLifecycle {
    Stopped = 0,
    Starting = 1,
    Started = 2,
}

impl ServerLifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerLifecycle::Starting,
            2 => ServerLifecycle::Started,
            _ => ServerLifecycle::Stopped,
        }
    }
}

/// The transport-specific half of a server.
#[async_trait]
pub trait ServerTransport: Send {
    /// Prepares resources. Called before every start attempt.
    async fn do_init(&mut self) -> Result<(), RemotingError>;

    /// Starts serving. `Ok(false)` reports a start that did not take effect.
    async fn do_start(&mut self) -> Result<bool, RemotingError>;

    /// Stops serving and releases resources. Must tolerate a partial start.
    async fn do_stop(&mut self) -> bool;
}

/// Runs a `ServerTransport` through `Stopped → Starting → Started → Stopped`.
///
/// State transitions are compare-and-swap, so concurrent `start` or `stop`
/// calls are rejected rather than interleaved.
pub struct RemotingServer<T> {
    ip: String,
    port: u16,
    state: AtomicU8,
    transport: tokio::sync::Mutex<T>,
}

impl<T: ServerTransport> RemotingServer<T> {
    pub fn new(ip: impl Into<String>, port: u16, transport: T) -> Self {
        Self {
            ip: ip.into(),
            port,
            state: AtomicU8::new(ServerLifecycle::Stopped as u8),
            transport: tokio::sync::Mutex::new(transport),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ServerLifecycle {
        ServerLifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn transport(&self) -> &tokio::sync::Mutex<T> {
        &self.transport
    }

    fn transition(&self, from: ServerLifecycle, to: ServerLifecycle) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_state(&self, state: ServerLifecycle) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Starts the server. Fails with `AlreadyStarted` unless it is stopped.
    ///
    /// A transport error triggers a best-effort `do_stop` and leaves the server
    /// stopped, so `start` may be retried.
    pub async fn start(&self) -> Result<bool, RemotingError> {
        if !self.transition(ServerLifecycle::Stopped, ServerLifecycle::Starting) {
            return Err(RemotingError::AlreadyStarted);
        }
        let _starting = StartingGuard { state: &self.state };

        let mut transport = self.transport.lock().await;
        let outcome = match transport.do_init().await {
            Ok(()) => transport.do_start().await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(true) => {
                self.set_state(ServerLifecycle::Started);
                info!("Server started on {}:{}", self.ip, self.port);
                Ok(true)
            }
            Ok(false) => {
                self.set_state(ServerLifecycle::Stopped);
                warn!("Server on {}:{} did not start", self.ip, self.port);
                Ok(false)
            }
            Err(e) => {
                error!("ERROR: Failed to start the server on {}:{}: {}", self.ip, self.port, e);
                transport.do_stop().await;
                self.set_state(ServerLifecycle::Stopped);
                Err(RemotingError::ServerStart(e.to_string()))
            }
        }
    }

    /// Stops a started server. Fails with `AlreadyStopped` otherwise.
    pub async fn stop(&self) -> Result<bool, RemotingError> {
        if !self.transition(ServerLifecycle::Started, ServerLifecycle::Stopped) {
            return Err(RemotingError::AlreadyStopped);
        }
        let stopped = self.transport.lock().await.do_stop().await;
        info!("Server on {}:{} stopped, result={}", self.ip, self.port, stopped);
        Ok(stopped)
    }
}

/// Returns a server to `Stopped` when a `start` call is dropped while still
/// `Starting`. The next `start` re-runs `do_init` on the transport.
struct StartingGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        let reset = self.state.compare_exchange(
            ServerLifecycle::Starting as u8,
            ServerLifecycle::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if reset.is_ok() {
            warn!("Server start was cancelled before it completed");
        }
    }
}

impl RemotingServer<TcpTransport> {
    /// The address the server is listening on, once started.
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.transport.lock().await.local_addr()
    }
}
