// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use remora::client::{ConnectionFactory, ConnectionUrl};
use remora::config::Config;
use remora::connection::Connection;
use remora::core::handler::{RemotingContext, RequestProcessor, RpcCommandHandler};
use remora::core::invoke::{InvokeIdGenerator, RemotingInvoker};
use remora::core::protocol::{ProtocolRegistry, RpcProtocol};
use remora::core::{Command, ProtocolVersion, RemotingError};
use remora::server::{RemotingServer, TcpTransport, tcp_server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// A processor driven by its payload:
/// - `sleep:<ms>` sleeps, then echoes
/// - `fail` returns an error
/// - anything else is echoed
#[derive(Default)]
pub struct ScriptedProcessor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RequestProcessor for ScriptedProcessor {
    async fn process(&self, _ctx: &RemotingContext, request: &Command) -> Result<Bytes, RemotingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let payload = request.payload().clone();
        let text = String::from_utf8_lossy(&payload).to_string();
        if let Some(ms) = text.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        } else if text == "fail" {
            return Err(RemotingError::Internal("scripted failure".into()));
        }
        Ok(payload)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A config bound to an ephemeral loopback port.
pub fn test_config() -> Config {
    Config {
        port: 0,
        ..Config::default()
    }
}

pub fn registry_with(processor: Option<Arc<dyn RequestProcessor>>, config: &Config) -> Arc<ProtocolRegistry> {
    let handler = match processor {
        Some(processor) => RpcCommandHandler::with_processor(processor),
        None => RpcCommandHandler::new(),
    };
    let registry = Arc::new(ProtocolRegistry::new());
    registry
        .register(Arc::new(RpcProtocol::new(
            Arc::new(handler),
            config.transport.max_frame_size,
        )))
        .expect("register rpc protocol");
    registry
}

/// TestContext provides a started server plus a connection factory pointed at it.
pub struct TestContext {
    pub server: RemotingServer<TcpTransport>,
    pub addr: SocketAddr,
    pub processor: Arc<ScriptedProcessor>,
    pub factory: ConnectionFactory,
    pub config: Arc<Config>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_configs(test_config(), test_config()).await
    }

    /// Starts a server with `server_config` and builds a client factory from `client_config`.
    pub async fn with_configs(server_config: Config, client_config: Config) -> Self {
        init_tracing();
        let processor = Arc::new(ScriptedProcessor::default());
        let server_config = Arc::new(server_config);
        let protocols = registry_with(Some(processor.clone()), &server_config);
        let server = tcp_server(server_config, protocols);
        assert_eq!(server.start().await, Ok(true));
        let addr = server.local_addr().await.expect("server is listening");

        let client_config = Arc::new(client_config);
        let invoker = Arc::new(RemotingInvoker::new(
            &client_config.invoke,
            InvokeIdGenerator::new(),
        ));
        let factory = ConnectionFactory::new(
            client_config.clone(),
            registry_with(None, &client_config),
            invoker,
        );

        Self {
            server,
            addr,
            processor,
            factory,
            config: client_config,
        }
    }

    pub fn url(&self) -> ConnectionUrl {
        ConnectionUrl::from_config(self.addr.ip().to_string(), self.addr.port(), &self.config)
    }

    pub async fn connect(&self) -> Arc<Connection> {
        self.factory.connect(&self.url()).await.expect("connect")
    }

    pub async fn connect_with_version(&self, version: u8) -> Arc<Connection> {
        let url = self.url().with_protocol(self.url().protocol_code, ProtocolVersion(version));
        self.factory.connect(&url).await.expect("connect")
    }

    pub fn invoker(&self) -> &Arc<RemotingInvoker> {
        self.factory.invoker()
    }

    pub async fn shutdown(self) {
        let _ = self.server.stop().await;
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
