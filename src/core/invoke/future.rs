// src/core/invoke/future.rs

//! Defines `InvokeFuture`, the per-call result slot that correlates a response
//! with the request that created it.
//!
//! # Completion Races
//!
//! Three parties may try to complete a future: the read loop delivering the
//! response, the future's own timeout task, and the connection's close-time
//! drain. Each of them first removes the future from the connection's table, so
//! normally only one proceeds. The result slot is single-assignment on top of
//! that: the first `put_response` wins and every later one is ignored and
//! counted, which keeps the drain-versus-response race safe even when both got
//! hold of the future.

use super::InvokeCallback;
use crate::core::metrics;
use crate::core::{Command, InvokeId, ProtocolCode, RemotingError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// What a waiter eventually observes: the response command, or the failure that
/// terminated the call.
pub type InvokeResult = Result<Command, RemotingError>;

/// One outstanding request awaiting its response.
pub struct InvokeFuture {
    invoke_id: InvokeId,
    protocol_code: ProtocolCode,
    remote: Option<SocketAddr>,
    result: watch::Sender<Option<InvokeResult>>,
    callback: Option<Arc<dyn InvokeCallback>>,
    callback_executed: AtomicBool,
    timeout: Mutex<Option<AbortHandle>>,
    runtime: Option<Handle>,
    created_at: Instant,
}

impl InvokeFuture {
    pub fn new(
        invoke_id: InvokeId,
        protocol_code: ProtocolCode,
        remote: Option<SocketAddr>,
        callback: Option<Arc<dyn InvokeCallback>>,
    ) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            invoke_id,
            protocol_code,
            remote,
            result,
            callback,
            callback_executed: AtomicBool::new(false),
            timeout: Mutex::new(None),
            runtime: Handle::try_current().ok(),
            created_at: Instant::now(),
        }
    }

    pub fn invoke_id(&self) -> InvokeId {
        self.invoke_id
    }

    pub fn protocol_code(&self) -> ProtocolCode {
        self.protocol_code
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    fn remote_string(&self) -> String {
        self.remote
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Fills the result slot. Returns `false` if the slot was already filled, in
    /// which case `result` is dropped.
    pub fn put_response(&self, result: InvokeResult) -> bool {
        let mut pending = Some(result);
        let filled = self.result.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = pending.take();
                true
            } else {
                false
            }
        });
        if !filled {
            metrics::LATE_COMPLETIONS_TOTAL.inc();
            debug!(
                "Ignoring late completion for invocation {} from {}",
                self.invoke_id,
                self.remote_string()
            );
        }
        filled
    }

    /// The failure used when the owning connection closes under this call.
    pub fn create_connection_closed_response(&self, remote: Option<SocketAddr>) -> InvokeResult {
        Err(RemotingError::ConnectionClosed {
            remote: remote
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// The failure used when the future's own timeout fires.
    pub fn create_timeout_response(&self) -> InvokeResult {
        Err(RemotingError::Timeout {
            invoke_id: self.invoke_id,
            remote: self.remote_string(),
        })
    }

    pub fn is_done(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// Returns the result if the slot is filled, without waiting.
    pub fn try_result(&self) -> Option<InvokeResult> {
        self.result.borrow().clone()
    }

    /// Waits up to `timeout` for the slot to be filled.
    ///
    /// This wait is independent from the future's own scheduled timeout: a
    /// caller may give up earlier or later than the future does.
    pub async fn wait_response(&self, timeout: Duration) -> InvokeResult {
        let mut rx = self.result.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(slot)) => slot.clone().unwrap_or_else(|| {
                Err(RemotingError::Internal(
                    "invoke future woke without a result".into(),
                ))
            }),
            Ok(Err(_)) => Err(RemotingError::Internal(
                "invoke future result channel closed".into(),
            )),
            Err(_) => self.create_timeout_response(),
        }
    }

    /// Attaches the handle of the scheduled timeout task.
    pub fn add_timeout(&self, handle: AbortHandle) {
        let previous = self.timeout.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels the scheduled timeout. A no-op once it fired or was cancelled.
    pub fn cancel_timeout(&self) {
        if let Some(handle) = self.timeout.lock().take() {
            handle.abort();
        }
    }

    /// Runs the callback with the result of a normal completion.
    pub fn execute_invoke_callback(&self) {
        self.dispatch_callback();
    }

    /// Runs the callback with the failure that terminated the call (drain or
    /// timeout). The callback is handed off so the caller never blocks on it.
    pub fn try_async_execute_invoke_callback_abnormally(&self) {
        self.dispatch_callback();
    }

    fn dispatch_callback(&self) {
        let Some(callback) = self.callback.clone() else {
            return;
        };
        let Some(result) = self.try_result() else {
            warn!(
                "Refusing to run the callback of invocation {} before it completed",
                self.invoke_id
            );
            return;
        };
        if self
            .callback_executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let run = move || match result {
            Ok(response) => callback.on_response(response),
            Err(error) => callback.on_exception(error),
        };
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn_blocking(run);
            }
            None => run(),
        }
    }
}

impl std::fmt::Debug for InvokeFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeFuture")
            .field("invoke_id", &self.invoke_id)
            .field("protocol_code", &self.protocol_code)
            .field("remote", &self.remote)
            .field("done", &self.is_done())
            .field("has_callback", &self.has_callback())
            .finish()
    }
}
