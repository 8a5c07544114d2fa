//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and dial it with
//! the client connector, so both halves of the transport are exercised.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use tavern_transport::{
        Connection, Connector, Transport, TransportError, WebSocketConnector,
        WebSocketTransport,
    };

    /// Binds a transport on a random port and returns it with its URL.
    async fn bind_local() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have local addr");
        (transport, format!("ws://{addr}"))
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, url) = bind_local().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client = WebSocketConnector::new(&url)
            .connect()
            .await
            .expect("client should connect");
        let server_conn = server_handle.await.expect("task should complete");

        assert_ne!(server_conn.id(), client.id());

        // --- Server sends, client receives ---
        server_conn
            .send(br#"{"type":"snapshot"}"#)
            .await
            .expect("send should succeed");
        let received = client
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"type":"snapshot"}"#);

        // --- Client sends, server receives ---
        client
            .send(br#"{"type":"join","room":"ABC123"}"#)
            .await
            .expect("send should succeed");
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"type":"join","room":"ABC123"}"#);

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_peer_close() {
        let (mut transport, url) = bind_local().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client = WebSocketConnector::new(&url)
            .connect()
            .await
            .expect("client should connect");
        let server_conn = server_handle.await.unwrap();

        client.close().await.expect("close should succeed");

        let result = tokio::time::timeout(Duration::from_secs(2), server_conn.recv())
            .await
            .expect("recv should not hang")
            .expect("recv should not error");
        assert!(result.is_none(), "should return None on peer close");
    }

    #[tokio::test]
    async fn test_websocket_send_while_recv_pending_does_not_block() {
        let (mut transport, url) = bind_local().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let client = WebSocketConnector::new(&url).connect().await.unwrap();
        let server_conn = std::sync::Arc::new(server_handle.await.unwrap());

        // Park a reader on the server side, then write from another task.
        let reader = std::sync::Arc::clone(&server_conn);
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), server_conn.send(b"ping"))
            .await
            .expect("send must not wait for the reader")
            .expect("send should succeed");
        assert_eq!(client.recv().await.unwrap().unwrap(), b"ping");

        client.send(b"pong").await.unwrap();
        let got = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(got, b"pong");
    }

    #[tokio::test]
    async fn test_connector_unreachable_returns_connect_failed() {
        // Bind then drop to get a port nobody listens on.
        let (transport, url) = bind_local().await;
        drop(transport);

        let result = WebSocketConnector::new(&url).connect().await;
        assert!(
            matches!(result, Err(TransportError::ConnectFailed { .. })),
            "expected ConnectFailed"
        );
    }
}
