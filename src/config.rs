// src/config.rs

//! Manages remoting configuration: loading, environment overrides, and validation.
//!
//! A `Config` is built once, validated, and then shared immutably (usually behind
//! an `Arc`) by servers, connection factories and invokers.

use crate::core::protocol::rpc::{DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION_1, PROTOCOL_VERSION_2};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Socket and buffer options of the TCP transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
    #[serde(default = "default_true")]
    pub so_reuseaddr: bool,
    /// The accept queue length passed to `listen`.
    #[serde(default = "default_so_backlog")]
    pub so_backlog: u32,
    #[serde(default = "default_true")]
    pub so_keepalive: bool,
    /// Accepted for compatibility with event-loop based transports. Unused by tokio.
    #[serde(default = "default_io_ratio")]
    pub io_ratio: u8,
    /// Accepted for compatibility with event-loop based transports. Unused by tokio.
    #[serde(default = "default_true")]
    pub buffer_pooled: bool,
    /// Accepted for compatibility with event-loop based transports. Unused by tokio.
    #[serde(default = "default_true")]
    pub epoll: bool,
    /// Accepted for compatibility with event-loop based transports. Unused by tokio.
    #[serde(default = "default_true")]
    pub epoll_lt: bool,
    /// Writes are refused once this many bytes are queued for a connection.
    #[serde(default = "default_write_buffer_high_watermark")]
    pub write_buffer_high_watermark: usize,
    /// A refusing connection accepts writes again once its queue drains to this size.
    #[serde(default = "default_write_buffer_low_watermark")]
    pub write_buffer_low_watermark: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            so_reuseaddr: true,
            so_backlog: default_so_backlog(),
            so_keepalive: true,
            io_ratio: default_io_ratio(),
            buffer_pooled: true,
            epoll: true,
            epoll_lt: true,
            write_buffer_high_watermark: default_write_buffer_high_watermark(),
            write_buffer_low_watermark: default_write_buffer_low_watermark(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_so_backlog() -> u32 {
    1024
}
fn default_io_ratio() -> u8 {
    70
}
fn default_write_buffer_high_watermark() -> usize {
    64 * 1024 // 64 KB
}
fn default_write_buffer_low_watermark() -> usize {
    32 * 1024 // 32 KB
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// Connection management options, for both sides of a connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Accepted for compatibility. Reconnection is left to the caller.
    #[serde(default)]
    pub reconnect: bool,
    /// Accepted for compatibility. Connection monitoring is left to the caller.
    #[serde(default)]
    pub monitor: bool,
    /// Enables client heartbeats and server idle closing.
    #[serde(default = "default_true")]
    pub tcp_idle_switch: bool,
    /// Read inactivity after which a client sends a heartbeat.
    #[serde(with = "humantime_serde", default = "default_client_idle_timeout")]
    pub client_idle_timeout: Duration,
    /// Read inactivity after which a server closes a connection.
    #[serde(with = "humantime_serde", default = "default_server_idle_timeout")]
    pub server_idle_timeout: Duration,
    /// Consecutive failed heartbeats after which a client closes its connection.
    #[serde(default = "default_heartbeat_max_failures")]
    pub heartbeat_max_failures: u32,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: false,
            monitor: false,
            tcp_idle_switch: true,
            client_idle_timeout: default_client_idle_timeout(),
            server_idle_timeout: default_server_idle_timeout(),
            heartbeat_max_failures: default_heartbeat_max_failures(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_client_idle_timeout() -> Duration {
    Duration::from_secs(15)
}
fn default_server_idle_timeout() -> Duration {
    Duration::from_secs(90)
}
fn default_heartbeat_max_failures() -> u32 {
    3
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Defaults stamped onto outgoing invocations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InvokeConfig {
    /// The serializer id written into every request. Opaque to the transport.
    #[serde(default = "default_serializer")]
    pub serializer: u8,
    #[serde(with = "humantime_serde", default = "default_invoke_timeout")]
    pub default_timeout: Duration,
    /// The RPC protocol version used by new client connections.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            serializer: default_serializer(),
            default_timeout: default_invoke_timeout(),
            protocol_version: default_protocol_version(),
        }
    }
}

fn default_serializer() -> u8 {
    1
}
fn default_invoke_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION_1.0
}

/// The root configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    /// `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub invoke: InvokeConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    12200
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            transport: TransportConfig::default(),
            connection: ConnectionConfig::default(),
            invoke: InvokeConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from an optional TOML file, then applies
    /// `REMORA_*` environment overrides (`REMORA_PORT`, `REMORA_TRANSPORT__TCP_NODELAY`).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("REMORA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from '{path}'"))?;
        let config: Config = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from '{path}'"))?;

        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document, without environment overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        let transport = &self.transport;
        if transport.so_backlog == 0 {
            return Err(anyhow!("transport.so_backlog cannot be 0"));
        }
        if transport.io_ratio == 0 || transport.io_ratio > 100 {
            return Err(anyhow!("transport.io_ratio must be between 1 and 100"));
        }
        if transport.write_buffer_high_watermark == 0 {
            return Err(anyhow!("transport.write_buffer_high_watermark cannot be 0"));
        }
        if transport.write_buffer_low_watermark > transport.write_buffer_high_watermark {
            return Err(anyhow!(
                "transport.write_buffer_low_watermark ({}) cannot exceed write_buffer_high_watermark ({})",
                transport.write_buffer_low_watermark,
                transport.write_buffer_high_watermark
            ));
        }
        if transport.max_frame_size == 0 || transport.max_frame_size > u32::MAX as usize {
            return Err(anyhow!("transport.max_frame_size must fit in a u32 and be non-zero"));
        }

        let connection = &self.connection;
        if connection.heartbeat_max_failures == 0 {
            return Err(anyhow!("connection.heartbeat_max_failures cannot be 0"));
        }
        if connection.connect_timeout.is_zero() {
            return Err(anyhow!("connection.connect_timeout cannot be 0"));
        }
        if connection.tcp_idle_switch
            && (connection.client_idle_timeout.is_zero() || connection.server_idle_timeout.is_zero())
        {
            return Err(anyhow!(
                "idle timeouts cannot be 0 when connection.tcp_idle_switch is on"
            ));
        }
        if connection.tcp_idle_switch && connection.server_idle_timeout <= connection.client_idle_timeout {
            warn!(
                "connection.server_idle_timeout ({:?}) is not above client_idle_timeout ({:?}); idle clients may be dropped before they heartbeat.",
                connection.server_idle_timeout, connection.client_idle_timeout
            );
        }

        if self.invoke.default_timeout.is_zero() {
            return Err(anyhow!("invoke.default_timeout cannot be 0"));
        }
        if ![PROTOCOL_VERSION_1.0, PROTOCOL_VERSION_2.0].contains(&self.invoke.protocol_version) {
            return Err(anyhow!(
                "invoke.protocol_version {} is not supported",
                self.invoke.protocol_version
            ));
        }
        Ok(())
    }

    /// Logs the effective settings, including the ones tokio does not act on.
    pub fn log_settings(&self) {
        info!(
            "Transport: nodelay={}, reuseaddr={}, backlog={}, keepalive={}, watermarks={}/{}, max_frame_size={}",
            self.transport.tcp_nodelay,
            self.transport.so_reuseaddr,
            self.transport.so_backlog,
            self.transport.so_keepalive,
            self.transport.write_buffer_low_watermark,
            self.transport.write_buffer_high_watermark,
            self.transport.max_frame_size
        );
        info!(
            "Connection: idle_switch={}, client_idle={:?}, server_idle={:?}, heartbeat_max_failures={}",
            self.connection.tcp_idle_switch,
            self.connection.client_idle_timeout,
            self.connection.server_idle_timeout,
            self.connection.heartbeat_max_failures
        );
        info!(
            "Ignored by the tokio transport: io_ratio={}, buffer_pooled={}, epoll={}, epoll_lt={}, reconnect={}, monitor={}",
            self.transport.io_ratio,
            self.transport.buffer_pooled,
            self.transport.epoll,
            self.transport.epoll_lt,
            self.connection.reconnect,
            self.connection.monitor
        );
    }
}
