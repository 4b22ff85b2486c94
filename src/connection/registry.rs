// src/connection/registry.rs

//! Tracks the live connections of a server, keyed by pool key.

use super::Connection;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Tracks `conn` under `key`, returning any connection it replaced.
    pub fn add(&self, key: impl Into<String>, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections.insert(key.into(), conn)
    }

    /// Untracks `key`, but only if it still maps to this very connection.
    pub fn remove(&self, key: &str, conn: &Arc<Connection>) -> bool {
        self.connections
            .remove_if(key, |_, current| Arc::ptr_eq(current, conn))
            .is_some()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Connection>> {
        self.connections.get(key).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every tracked connection and returns how many there were.
    pub fn close_all(&self) -> usize {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for conn in &connections {
            conn.close();
        }
        debug!("Closed {} tracked connections", connections.len());
        connections.len()
    }
}
