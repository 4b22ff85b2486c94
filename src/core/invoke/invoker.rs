// src/core/invoke/invoker.rs

//! The four invocation styles: synchronous, future, callback and oneway.

use super::{InvokeCallback, InvokeFuture, InvokeIdGenerator};
use crate::config::InvokeConfig;
use crate::connection::Connection;
use crate::core::metrics;
use crate::core::{Command, RemotingError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Issues commands over a `Connection` and correlates their responses.
pub struct RemotingInvoker {
    ids: InvokeIdGenerator,
    serializer: u8,
    default_timeout: Duration,
}

impl RemotingInvoker {
    pub fn new(config: &InvokeConfig, ids: InvokeIdGenerator) -> Self {
        Self {
            ids,
            serializer: config.serializer,
            default_timeout: config.default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn next_id(&self) -> u32 {
        self.ids.next()
    }

    /// Builds a request for `conn`'s protocol with a fresh invoke id.
    pub fn request(&self, conn: &Connection, payload: Bytes, timeout: Option<Duration>) -> Command {
        Command::request(
            self.next_id(),
            conn.protocol_code(),
            conn.protocol_version(),
            self.serializer,
            timeout_millis(timeout.unwrap_or(self.default_timeout)),
            payload,
        )
    }

    /// Builds a oneway request for `conn`'s protocol with a fresh invoke id.
    pub fn oneway_request(&self, conn: &Connection, payload: Bytes) -> Command {
        Command::oneway(
            self.next_id(),
            conn.protocol_code(),
            conn.protocol_version(),
            self.serializer,
            payload,
        )
    }

    pub fn heartbeat(&self, conn: &Connection, timeout: Duration) -> Command {
        Command::heartbeat(
            self.next_id(),
            conn.protocol_code(),
            conn.protocol_version(),
            timeout_millis(timeout),
        )
    }

    /// Sends `request` and waits up to `timeout` for its response.
    ///
    /// The response is returned as received; use `Command::into_result` to turn a
    /// non-success status into an error.
    pub async fn invoke_sync(
        &self,
        conn: &Arc<Connection>,
        request: Command,
        timeout: Duration,
    ) -> Result<Command, RemotingError> {
        metrics::INVOCATIONS_TOTAL.with_label_values(&["sync"]).inc();
        let future = self.register(conn, &request, None)?;
        let invoke_id = request.invoke_id();
        // Cleans up the table even if this call is dropped before it resolves.
        self.schedule_timeout(conn, &future, timeout);

        if let Err(e) = conn.send(&request) {
            if let Some(future) = conn.remove_invoke_future(invoke_id) {
                future.cancel_timeout();
            }
            warn!("Failed to send invocation {} to {}: {}", invoke_id, conn.remote_string(), e);
            return Err(RemotingError::SendFailed(e.to_string()));
        }

        let result = future.wait_response(timeout).await;
        if let Err(RemotingError::Timeout { .. }) = &result {
            // Only the party that removes the future gets to fail it.
            if let Some(future) = conn.remove_invoke_future(invoke_id) {
                future.cancel_timeout();
                metrics::INVOKE_TIMEOUTS_TOTAL.inc();
            }
        }
        result
    }

    /// Sends `request` and returns its future. The future fails on its own once
    /// `timeout` elapses without a response.
    pub fn invoke_with_future(
        &self,
        conn: &Arc<Connection>,
        request: Command,
        timeout: Duration,
    ) -> Result<Arc<InvokeFuture>, RemotingError> {
        metrics::INVOCATIONS_TOTAL.with_label_values(&["future"]).inc();
        let future = self.register(conn, &request, None)?;
        self.schedule_timeout(conn, &future, timeout);

        if let Err(e) = conn.send(&request) {
            if let Some(future) = conn.remove_invoke_future(request.invoke_id()) {
                future.cancel_timeout();
            }
            return Err(RemotingError::SendFailed(e.to_string()));
        }
        Ok(future)
    }

    /// Sends `request`; `callback` receives the outcome exactly once.
    ///
    /// A send failure is reported through the callback rather than returned.
    pub fn invoke_with_callback(
        &self,
        conn: &Arc<Connection>,
        request: Command,
        callback: Arc<dyn InvokeCallback>,
        timeout: Duration,
    ) -> Result<(), RemotingError> {
        metrics::INVOCATIONS_TOTAL.with_label_values(&["callback"]).inc();
        let future = self.register(conn, &request, Some(callback))?;
        self.schedule_timeout(conn, &future, timeout);

        if let Err(e) = conn.send(&request)
            && let Some(future) = conn.remove_invoke_future(request.invoke_id())
        {
            future.cancel_timeout();
            future.put_response(Err(RemotingError::SendFailed(e.to_string())));
            future.try_async_execute_invoke_callback_abnormally();
        }
        Ok(())
    }

    /// Sends `request` without expecting any response.
    pub fn oneway(&self, conn: &Arc<Connection>, request: Command) -> Result<(), RemotingError> {
        metrics::INVOCATIONS_TOTAL.with_label_values(&["oneway"]).inc();
        if !conn.is_fine() {
            return Err(RemotingError::ConnectionNotFine(conn.remote_string()));
        }
        conn.send(&request).map_err(|e| {
            warn!("Failed to send oneway {} to {}: {}", request.invoke_id(), conn.remote_string(), e);
            RemotingError::SendFailed(e.to_string())
        })
    }

    fn register(
        &self,
        conn: &Arc<Connection>,
        request: &Command,
        callback: Option<Arc<dyn InvokeCallback>>,
    ) -> Result<Arc<InvokeFuture>, RemotingError> {
        if !conn.is_fine() {
            return Err(RemotingError::ConnectionNotFine(conn.remote_string()));
        }
        let future = Arc::new(InvokeFuture::new(
            request.invoke_id(),
            request.protocol_code(),
            conn.remote_addr(),
            callback,
        ));
        if conn.add_invoke_future(future.clone()).is_some() {
            return Err(RemotingError::InvocationIdCollision(request.invoke_id()));
        }
        Ok(future)
    }

    fn schedule_timeout(&self, conn: &Arc<Connection>, future: &Arc<InvokeFuture>, timeout: Duration) {
        let conn = conn.clone();
        let invoke_id = future.invoke_id();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(future) = conn.remove_invoke_future(invoke_id) {
                debug!("Invocation {} to {} timed out", invoke_id, conn.remote_string());
                metrics::INVOKE_TIMEOUTS_TOTAL.inc();
                future.put_response(future.create_timeout_response());
                future.try_async_execute_invoke_callback_abnormally();
            }
        });
        future.add_timeout(task.abort_handle());
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryChannel;
    use crate::core::invoke::FnCallback;
    use crate::core::handler::RpcCommandHandler;
    use crate::core::protocol::rpc::{DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION_1};
    use crate::core::protocol::RpcProtocol;
    use crate::core::ResponseStatus;

    fn setup() -> (RemotingInvoker, Arc<MemoryChannel>, Arc<Connection>) {
        let channel = Arc::new(MemoryChannel::new());
        let protocol = Arc::new(RpcProtocol::new(
            Arc::new(RpcCommandHandler::new()),
            DEFAULT_MAX_FRAME_SIZE,
        ));
        let conn = Arc::new(Connection::new(channel.clone(), protocol, PROTOCOL_VERSION_1));
        let invoker = RemotingInvoker::new(&InvokeConfig::default(), InvokeIdGenerator::new());
        (invoker, channel, conn)
    }

    #[tokio::test]
    async fn test_invoke_sync_times_out_and_removes_future() {
        let (invoker, channel, conn) = setup();
        let request = invoker.request(&conn, Bytes::from_static(b"ping"), None);
        let err = invoker
            .invoke_sync(&conn, request, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RemotingError::Timeout { .. }));
        assert!(conn.is_invoke_future_table_empty());
        assert_eq!(channel.written().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_sync_completes_on_response() {
        let (invoker, _channel, conn) = setup();
        let request = invoker.request(&conn, Bytes::from_static(b"ping"), None);
        let response = request.response_to(ResponseStatus::Success, Bytes::from_static(b"pong"));
        let invoke_id = request.invoke_id();

        let responder = {
            let conn = conn.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(future) = conn.remove_invoke_future(invoke_id) {
                        future.put_response(Ok(response));
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        let result = invoker
            .invoke_sync(&conn, request, Duration::from_secs(2))
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(result.into_result().unwrap(), Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn test_dropped_invoke_sync_is_cleaned_up_by_its_timeout() {
        let (invoker, _channel, conn) = setup();
        for _ in 0..20 {
            let request = invoker.request(&conn, Bytes::new(), None);
            let abandoned = tokio::time::timeout(
                Duration::from_millis(1),
                invoker.invoke_sync(&conn, request, Duration::from_millis(500)),
            )
            .await;
            assert!(abandoned.is_err());
        }
        assert_eq!(conn.invoke_future_count(), 20);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(conn.invoke_future_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timeout_racing_a_response_completes_once() {
        let (invoker, _channel, conn) = setup();
        let handler = conn.protocol().command_handler();
        for _ in 0..50 {
            let request = invoker.request(&conn, Bytes::new(), None);
            let response = request.response_to(ResponseStatus::Success, Bytes::from_static(b"ok"));
            let future = invoker
                .invoke_with_future(&conn, request, Duration::from_millis(2))
                .unwrap();

            let responder = {
                let conn = conn.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    handler.handle_command(&conn, response).await
                })
            };
            responder.await.unwrap().unwrap();

            let observed = future.wait_response(Duration::from_secs(1)).await;
            assert!(matches!(
                observed,
                Ok(_) | Err(RemotingError::Timeout { .. })
            ));
            assert_eq!(format!("{:?}", future.try_result()), format!("{:?}", Some(observed)));
            future.cancel_timeout();
            assert!(conn.is_invoke_future_table_empty());
        }
    }

    #[tokio::test]
    async fn test_invoke_with_future_fails_itself_after_timeout() {
        let (invoker, _channel, conn) = setup();
        let request = invoker.request(&conn, Bytes::new(), None);
        let future = invoker
            .invoke_with_future(&conn, request, Duration::from_millis(10))
            .unwrap();
        let result = future.wait_response(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(RemotingError::Timeout { .. })));
        assert!(conn.is_invoke_future_table_empty());
    }

    #[tokio::test]
    async fn test_invoke_with_callback_reports_send_failure() {
        let (invoker, channel, conn) = setup();
        channel.fail_writes(true);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback = Arc::new(FnCallback::new(move |result| {
            let _ = tx.send(result);
        }));
        let request = invoker.request(&conn, Bytes::new(), None);
        invoker
            .invoke_with_callback(&conn, request, callback, Duration::from_secs(1))
            .unwrap();
        let result = rx.recv().await.unwrap();
        assert!(matches!(result, Err(RemotingError::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_fine() {
        let (invoker, channel, conn) = setup();
        conn.close();
        let request = invoker.request(&conn, Bytes::new(), None);
        let err = invoker
            .invoke_sync(&conn, request, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RemotingError::ConnectionNotFine(_)));
        let oneway = invoker.oneway_request(&conn, Bytes::new());
        assert!(invoker.oneway(&conn, oneway).is_err());
        assert!(channel.written().is_empty());
    }

    #[test]
    fn test_oversized_timeout_saturates() {
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
        assert_eq!(timeout_millis(Duration::from_millis(1500)), 1500);
    }
}
