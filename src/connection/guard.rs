// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::{Connection, ConnectionRegistry};
use crate::core::metrics;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard to ensure connection bookkeeping is always undone when a
/// connection handler's scope is exited.
pub struct ConnectionGuard {
    /// The server's registry, if the connection was tracked in one.
    pub(crate) registry: Option<Arc<ConnectionRegistry>>,
    /// The key the connection is tracked under.
    pub(crate) pool_key: String,
    pub(crate) conn: Arc<Connection>,
}

impl ConnectionGuard {
    /// Creates a new `ConnectionGuard`, registering `conn` under `pool_key`.
    pub(crate) fn new(
        registry: Option<Arc<ConnectionRegistry>>,
        pool_key: String,
        conn: Arc<Connection>,
    ) -> Self {
        if let Some(registry) = &registry {
            registry.add(pool_key.clone(), conn.clone());
        }
        metrics::OPEN_CONNECTIONS.inc();
        Self {
            registry,
            pool_key,
            conn,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Removes the connection from the registry and the open connection gauge.
    fn drop(&mut self) {
        metrics::OPEN_CONNECTIONS.dec();
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.pool_key
        );

        if let Some(registry) = &self.registry
            && !registry.remove(&self.pool_key, &self.conn)
        {
            debug!(
                "Connection {} was not in the registry upon cleanup (likely replaced).",
                self.pool_key
            );
        }
    }
}
