// tests/integration/connection_test.rs

use super::test_helpers::{TestContext, eventually, test_config};
use bytes::Bytes;
use remora::client::ConnectionUrl;
use remora::connection::ConnectionLease;
use remora::core::ProtocolCode;
use remora::core::RemotingError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_client_connection_carries_url_pool_key() {
    let ctx = TestContext::new().await;
    let conn = ctx.connect().await;
    let url = ctx.url();
    assert_eq!(conn.pool_keys(), vec![url.unique_key()]);
    assert_eq!(conn.url(), Some(&url));
    assert_eq!(conn.remote_addr(), Some(ctx.addr));
    assert!(conn.local_port().is_some());

    {
        let _lease = ConnectionLease::new(conn.clone());
        assert!(!conn.no_reference());
    }
    assert!(conn.no_reference());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_unknown_protocol_is_rejected_by_the_server() {
    let ctx = TestContext::new().await;
    let mut stream = TcpStream::connect(ctx.addr).await.unwrap();
    stream.write_all(&[0x7f, 1, 1, 1]).await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_connect_with_unregistered_protocol_fails() {
    let ctx = TestContext::new().await;
    let url = ctx.url().with_protocol(ProtocolCode(9), ctx.url().protocol_version);
    let err = ctx.factory.connect(&url).await.unwrap_err();
    assert_eq!(err, RemotingError::UnsupportedProtocol(9));
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let ctx = TestContext::new().await;
    let addr = ctx.addr;
    ctx.shutdown().await;

    let url = ConnectionUrl::new(addr.ip().to_string(), addr.port());
    let factory_ctx = TestContext::new().await;
    assert!(factory_ctx.factory.connect(&url).await.is_err());
    factory_ctx.shutdown().await;
}

#[tokio::test]
async fn test_idle_server_connection_is_closed() {
    let mut server_config = test_config();
    server_config.connection.client_idle_timeout = Duration::from_millis(50);
    server_config.connection.server_idle_timeout = Duration::from_millis(150);
    let mut client_config = test_config();
    client_config.connection.tcp_idle_switch = false;

    let ctx = TestContext::with_configs(server_config, client_config).await;
    let conn = ctx.connect().await;
    let request = ctx.invoker().request(&conn, Bytes::from_static(b"ping"), None);
    ctx.invoker()
        .invoke_sync(&conn, request, Duration::from_secs(2))
        .await
        .unwrap();

    let probe = conn.clone();
    assert!(eventually(Duration::from_secs(3), || !probe.is_fine()).await);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_keep_an_idle_client_alive() {
    let mut server_config = test_config();
    server_config.connection.client_idle_timeout = Duration::from_millis(50);
    server_config.connection.server_idle_timeout = Duration::from_millis(300);
    let mut client_config = test_config();
    client_config.connection.client_idle_timeout = Duration::from_millis(50);

    let ctx = TestContext::with_configs(server_config, client_config).await;
    let conn = ctx.connect().await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(conn.is_fine());
    assert_eq!(conn.heartbeat_failures(), 0);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_disabled_heartbeat_lets_server_close_idle_client() {
    let mut server_config = test_config();
    server_config.connection.client_idle_timeout = Duration::from_millis(50);
    server_config.connection.server_idle_timeout = Duration::from_millis(200);
    let mut client_config = test_config();
    client_config.connection.client_idle_timeout = Duration::from_millis(50);

    let ctx = TestContext::with_configs(server_config, client_config).await;
    let conn = ctx.connect().await;
    conn.set_heartbeat_enabled(false);

    let probe = conn.clone();
    assert!(eventually(Duration::from_secs(3), || !probe.is_fine()).await);
    ctx.shutdown().await;
}
