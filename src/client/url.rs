// src/client/url.rs

use crate::config::Config;
use crate::core::protocol::rpc::{PROTOCOL_CODE, PROTOCOL_VERSION_1};
use crate::core::{ProtocolCode, ProtocolVersion, RemotingError};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::time::Duration;

/// Where and how to connect: the address plus the protocol the connection
/// will be bound to.
///
/// Parses from `host:port`, optionally followed by query parameters:
/// `127.0.0.1:12200?protocol=1&version=2&connect_timeout=500`
/// (the timeout is in milliseconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    pub host: String,
    pub port: u16,
    pub protocol_code: ProtocolCode,
    pub protocol_version: ProtocolVersion,
    pub connect_timeout: Duration,
}

impl ConnectionUrl {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol_code: PROTOCOL_CODE,
            protocol_version: PROTOCOL_VERSION_1,
            connect_timeout: Duration::from_secs(1),
        }
    }

    /// A url using the configured protocol version and connect timeout.
    pub fn from_config(host: impl Into<String>, port: u16, config: &Config) -> Self {
        Self {
            protocol_version: ProtocolVersion(config.invoke.protocol_version),
            connect_timeout: config.connection.connect_timeout,
            ..Self::new(host, port)
        }
    }

    pub fn with_protocol(mut self, code: ProtocolCode, version: ProtocolVersion) -> Self {
        self.protocol_code = code;
        self.protocol_version = version;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The pool key of connections created for this url. Also a dialable
    /// address, so IPv6 hosts are bracketed.
    pub fn unique_key(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}?protocol={}&version={}&connect_timeout={}",
            self.unique_key(),
            self.protocol_code.0,
            self.protocol_version.0,
            self.connect_timeout.as_millis()
        )
    }
}

impl FromStr for ConnectionUrl {
    type Err = RemotingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RemotingError::Config(format!("invalid url '{s}': {reason}"));

        let (address, query) = match s.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (s, None),
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed
                .strip_suffix(']')
                .ok_or_else(|| invalid("unclosed '['"))?,
            None => host,
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
        let mut url = ConnectionUrl::new(host, port);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| invalid("bad parameter"))?;
            match key {
                "protocol" => {
                    url.protocol_code =
                        ProtocolCode(value.parse().map_err(|_| invalid("bad protocol"))?)
                }
                "version" => {
                    url.protocol_version =
                        ProtocolVersion(value.parse().map_err(|_| invalid("bad version"))?)
                }
                "connect_timeout" => {
                    url.connect_timeout = Duration::from_millis(
                        value.parse().map_err(|_| invalid("bad connect_timeout"))?,
                    )
                }
                _ => return Err(invalid("unknown parameter")),
            }
        }
        Ok(url)
    }
}
