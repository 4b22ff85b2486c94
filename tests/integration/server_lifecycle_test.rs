// tests/integration/server_lifecycle_test.rs

use super::test_helpers::{TestContext, eventually, init_tracing, registry_with, test_config};
use bytes::Bytes;
use remora::core::RemotingError;
use remora::core::protocol::ProtocolRegistry;
use remora::server::{ServerLifecycle, tcp_server};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_start_and_stop_a_tcp_server() {
    init_tracing();
    let config = Arc::new(test_config());
    let server = tcp_server(config.clone(), registry_with(None, &config));

    assert_eq!(server.start().await, Ok(true));
    assert_eq!(server.state(), ServerLifecycle::Started);
    let addr = server.local_addr().await.unwrap();
    assert_ne!(addr.port(), 0);
    TcpStream::connect(addr).await.unwrap();

    assert_eq!(server.start().await, Err(RemotingError::AlreadyStarted));
    assert_eq!(server.stop().await, Ok(true));
    assert_eq!(server.state(), ServerLifecycle::Stopped);
    assert!(server.local_addr().await.is_none());
    assert_eq!(server.stop().await, Err(RemotingError::AlreadyStopped));
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_bind_conflict_reports_start_failure_and_allows_retry() {
    init_tracing();
    let first_config = Arc::new(test_config());
    let first = tcp_server(first_config.clone(), registry_with(None, &first_config));
    first.start().await.unwrap();
    let taken = first.local_addr().await.unwrap();

    let mut config = test_config();
    config.port = taken.port();
    let config = Arc::new(config);
    let second = tcp_server(config.clone(), registry_with(None, &config));
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, RemotingError::ServerStart(_)));
    assert_eq!(second.state(), ServerLifecycle::Stopped);

    first.stop().await.unwrap();
    assert_eq!(second.start().await, Ok(true));
    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_without_protocols_fails() {
    init_tracing();
    let server = tcp_server(Arc::new(test_config()), Arc::new(ProtocolRegistry::new()));
    let err = server.start().await.unwrap_err();
    match err {
        RemotingError::ServerStart(cause) => assert!(cause.contains("no protocol")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.state(), ServerLifecycle::Stopped);
}

#[tokio::test]
async fn test_server_can_restart_after_stop() {
    let ctx = TestContext::new().await;
    ctx.server.stop().await.unwrap();
    assert_eq!(ctx.server.start().await, Ok(true));
    assert!(ctx.server.local_addr().await.is_some());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_stop_closes_client_connections() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"sleep:2000"), None);
    let future = ctx
        .invoker()
        .invoke_with_future(&conn, request, Duration::from_secs(5))
        .unwrap();

    // Wait until the server tracks the connection.
    let tracked = {
        let transport = ctx.server.transport().lock().await;
        transport.connections().clone()
    };
    assert!(eventually(Duration::from_secs(2), || tracked.len() == 1).await);

    ctx.server.stop().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || tracked.is_empty()).await);

    let result = future.wait_response(Duration::from_secs(3)).await;
    assert!(matches!(result, Err(RemotingError::ConnectionClosed { .. })));
    let probe = conn.clone();
    assert!(eventually(Duration::from_secs(2), || !probe.is_fine()).await);
}
