// src/connection/heartbeat.rs

//! Client-side heartbeats sent when a connection has been idle.

use super::Connection;
use crate::core::invoke::{FnCallback, InvokeResult, RemotingInvoker};
use crate::core::{CommandKind, ResponseStatus};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a heartbeat may go unanswered before it counts as a failure.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct HeartbeatTrigger {
    invoker: Arc<RemotingInvoker>,
    max_failures: u32,
    timeout: Duration,
}

impl HeartbeatTrigger {
    pub fn new(invoker: Arc<RemotingInvoker>, max_failures: u32, timeout: Duration) -> Self {
        Self {
            invoker,
            max_failures,
            timeout,
        }
    }

    /// Called by the read loop after a period of read inactivity.
    ///
    /// Closes the connection once `max_failures` consecutive heartbeats have
    /// failed; otherwise sends another one.
    pub fn heartbeat_triggered(&self, conn: &Arc<Connection>) {
        if !conn.is_heartbeat_enabled() {
            debug!("Heartbeat disabled for {}, skipping", conn.remote_string());
            return;
        }
        let failures = conn.heartbeat_failures();
        if failures >= self.max_failures {
            warn!(
                "Heartbeat to {} failed {} times in a row, closing the connection",
                conn.remote_string(),
                failures
            );
            conn.close();
            return;
        }

        let heartbeat = self.invoker.heartbeat(conn, self.timeout);
        let invoke_id = heartbeat.invoke_id();
        let weak: Weak<Connection> = Arc::downgrade(conn);
        let callback = FnCallback::new(move |result: InvokeResult| {
            let Some(conn) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(ack)
                    if ack.kind() == CommandKind::HeartbeatAck
                        && ack.status() == ResponseStatus::Success =>
                {
                    conn.reset_heartbeat_failures();
                    debug!("Heartbeat {} acknowledged by {}", invoke_id, conn.remote_string());
                }
                Ok(other) => {
                    let failures = conn.increase_heartbeat_failures();
                    warn!(
                        "Heartbeat {} to {} answered with {:?}/{}, failures={}",
                        invoke_id,
                        conn.remote_string(),
                        other.kind(),
                        other.status(),
                        failures
                    );
                }
                Err(e) => {
                    let failures = conn.increase_heartbeat_failures();
                    warn!(
                        "Heartbeat {} to {} failed: {}, failures={}",
                        invoke_id,
                        conn.remote_string(),
                        e,
                        failures
                    );
                }
            }
        });

        if let Err(e) =
            self.invoker
                .invoke_with_callback(conn, heartbeat, Arc::new(callback), self.timeout)
        {
            conn.increase_heartbeat_failures();
            warn!("Failed to send heartbeat to {}: {}", conn.remote_string(), e);
        }
    }
}
