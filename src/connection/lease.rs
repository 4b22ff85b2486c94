// src/connection/lease.rs

use super::Connection;
use std::ops::Deref;
use std::sync::Arc;

/// Holds one reference on a `Connection` for as long as it lives.
///
/// Pair with `Connection::no_reference` to decide when an idle pooled
/// connection may be reclaimed.
#[derive(Debug)]
pub struct ConnectionLease {
    conn: Arc<Connection>,
}

impl ConnectionLease {
    pub fn new(conn: Arc<Connection>) -> Self {
        conn.increase_ref();
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Deref for ConnectionLease {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.conn.decrease_ref();
    }
}
