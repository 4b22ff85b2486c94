// tests/integration/roundtrip_test.rs

use super::test_helpers::{TestContext, eventually};
use bytes::Bytes;
use remora::core::invoke::{FnCallback, InvokeResult};
use remora::core::{CommandKind, RemotingError, ResponseStatus};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_invoke_sync_echoes_payload() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"hello"), None);

    let response = ctx
        .invoker()
        .invoke_sync(&conn, request, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.kind(), CommandKind::Response);
    assert_eq!(response.into_result().unwrap(), Bytes::from_static(b"hello"));
    assert!(conn.is_invoke_future_table_empty());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_invoke_with_future() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"future"), None);

    let future = ctx
        .invoker()
        .invoke_with_future(&conn, request, Duration::from_secs(2))
        .unwrap();
    let response = future.wait_response(Duration::from_secs(2)).await.unwrap();
    assert_eq!(response.payload(), &Bytes::from_static(b"future"));
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_invoke_with_callback() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback = Arc::new(FnCallback::new(move |result: InvokeResult| {
        let _ = tx.send(result);
    }));
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"callback"), None);

    ctx.invoker()
        .invoke_with_callback(&conn, request, callback, Duration::from_secs(2))
        .unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap().payload(), &Bytes::from_static(b"callback"));
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_oneway_reaches_the_processor() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().oneway_request(&conn, Bytes::from_static(b"fire"));

    ctx.invoker().oneway(&conn, request).unwrap();
    let processor = ctx.processor.clone();
    assert!(eventually(Duration::from_secs(2), || processor.calls.load(Ordering::SeqCst) == 1).await);
    assert!(conn.is_invoke_future_table_empty());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let heartbeat = ctx.invoker().heartbeat(&conn, Duration::from_secs(1));

    let ack = ctx
        .invoker()
        .invoke_sync(&conn, heartbeat, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(ack.kind(), CommandKind::HeartbeatAck);
    assert_eq!(ack.status(), ResponseStatus::Success);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_processor_error_becomes_server_exception() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"fail"), None);

    let response = ctx
        .invoker()
        .invoke_sync(&conn, request, Duration::from_secs(2))
        .await
        .unwrap();
    match response.into_result() {
        Err(RemotingError::ServerResponse { status, message }) => {
            assert_eq!(status, ResponseStatus::ServerException);
            assert!(message.contains("scripted failure"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_slow_response_times_out_and_is_dropped_late() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"sleep:300"), None);

    let err = ctx
        .invoker()
        .invoke_sync(&conn, request, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RemotingError::Timeout { .. }));
    assert!(conn.is_invoke_future_table_empty());

    // The late response finds no future; the connection stays usable.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(conn.is_fine());
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"after"), None);
    let response = ctx
        .invoker()
        .invoke_sync(&conn, request, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.payload(), &Bytes::from_static(b"after"));
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_closing_connection_fails_pending_calls() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"sleep:1000"), None);
    let future = ctx
        .invoker()
        .invoke_with_future(&conn, request, Duration::from_secs(5))
        .unwrap();

    conn.close();
    let result = future.wait_response(Duration::from_secs(2)).await;
    assert!(matches!(result, Err(RemotingError::ConnectionClosed { .. })));
    assert!(!conn.is_fine());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated_by_id() {
    let ctx = Arc::new(TestContext::new().await);
    let conn = ctx.connect().await;

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let ctx = ctx.clone();
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            // Later requests finish first.
            let payload = Bytes::from(format!("sleep:{}", (16 - i) * 5));
            let request = ctx.invoker().request(&conn, payload.clone(), None);
            let response = ctx
                .invoker()
                .invoke_sync(&conn, request, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(response.payload(), &payload);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(conn.is_invoke_future_table_empty());
}

#[tokio::test]
async fn test_crc_protocol_version_round_trip() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect_with_version(2).await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"checked"), None);
    assert_eq!(request.protocol_version().0, 2);

    let response = ctx
        .invoker()
        .invoke_sync(&conn, request, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.protocol_version().0, 2);
    assert_eq!(response.payload(), &Bytes::from_static(b"checked"));
    ctx.shutdown().await;
}
