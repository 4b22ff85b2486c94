// src/main.rs

//! The main entry point for the remora echo server.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use remora::config::Config;
use remora::core::handler::{RemotingContext, RequestProcessor, RpcCommandHandler};
use remora::core::protocol::rpc::RpcProtocol;
use remora::core::protocol::ProtocolRegistry;
use remora::core::{Command, RemotingError};
use remora::server::tcp_server;
use std::env;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

/// Answers every request with its own payload.
struct EchoProcessor;

#[async_trait]
impl RequestProcessor for EchoProcessor {
    async fn process(&self, _ctx: &RemotingContext, request: &Command) -> Result<Bytes, RemotingError> {
        Ok(request.payload().clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("remora version {VERSION}");
        return Ok(());
    }

    // The file is optional; defaults and REMORA_* variables apply without it.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("remora.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .init();

    info!("Starting remora {}", VERSION);
    config.log_settings();
    let config = Arc::new(config);

    let protocols = Arc::new(ProtocolRegistry::new());
    let handler = Arc::new(RpcCommandHandler::with_processor(Arc::new(EchoProcessor)));
    protocols.register(Arc::new(RpcProtocol::new(
        handler,
        config.transport.max_frame_size,
    )))?;

    let server = tcp_server(config.clone(), protocols);
    if !server.start().await? {
        return Err(anyhow!("server did not start"));
    }
    if let Some(addr) = server.local_addr().await {
        info!("Ready to accept connections on {}", addr);
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }

    if let Err(e) = server.stop().await {
        error!("Server shutdown error: {}", e);
        return Err(e.into());
    }
    info!("Server shutdown complete.");
    Ok(())
}
