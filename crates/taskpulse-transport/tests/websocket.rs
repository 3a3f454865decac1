//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and client to verify that frames flow,
//! that clean closes surface as `None`, and that the upgrade-time origin
//! check and Authorization capture behave per the handshake contract.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use taskpulse_transport::{
    Connection, Transport, TransportError, WebSocketTransport,
};

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Binds a transport on a random port and returns it with its address.
async fn bind_transport(
    allowed_origin: Option<&str>,
) -> (WebSocketTransport, String) {
    let transport = WebSocketTransport::bind(
        "127.0.0.1:0",
        allowed_origin.map(str::to_string),
    )
    .await
    .expect("should bind");
    let addr = transport
        .local_addr()
        .expect("should have local addr")
        .to_string();
    (transport, addr)
}

async fn connect_client(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("client should connect");
    ws
}

#[tokio::test]
async fn test_websocket_accept_and_send_receive() {
    let (mut transport, addr) = bind_transport(None).await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let mut client_ws = connect_client(&addr).await;
    let server_conn = server_handle.await.expect("task should complete");

    assert!(server_conn.id().into_inner() > 0);

    // --- Server sends, client receives ---
    server_conn
        .send(b"hello from server")
        .await
        .expect("send should succeed");

    let msg = client_ws.next().await.unwrap().unwrap();
    assert_eq!(msg.into_data().as_ref(), b"hello from server");

    // --- Client sends, server receives ---
    client_ws
        .send(Message::Binary(b"hello from client".to_vec().into()))
        .await
        .unwrap();

    let received = server_conn
        .recv()
        .await
        .expect("recv should succeed")
        .expect("should have data");
    assert_eq!(received, b"hello from client");

    server_conn.close().await.expect("close should succeed");
}

#[tokio::test]
async fn test_websocket_recv_accepts_text_frames() {
    let (mut transport, addr) = bind_transport(None).await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let mut client_ws = connect_client(&addr).await;
    let server_conn = server_handle.await.unwrap();

    client_ws
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();

    let received = server_conn.recv().await.unwrap().unwrap();
    assert_eq!(received, br#"{"type":"ping"}"#);
}

#[tokio::test]
async fn test_websocket_recv_returns_none_on_client_close() {
    let (mut transport, addr) = bind_transport(None).await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let mut client_ws = connect_client(&addr).await;
    let server_conn = server_handle.await.unwrap();

    client_ws.send(Message::Close(None)).await.unwrap();

    let result = server_conn.recv().await.expect("recv should not error");
    assert!(result.is_none(), "should return None on client close");
}

#[tokio::test]
async fn test_websocket_rejects_disallowed_origin() {
    let (mut transport, addr) =
        bind_transport(Some("http://app.example")).await;

    let server_handle = tokio::spawn(async move { transport.accept().await });

    let mut req = format!("ws://{addr}")
        .into_client_request()
        .expect("valid request");
    req.headers_mut().insert(
        "origin",
        HeaderValue::from_static("http://evil.example"),
    );

    let client_result = tokio_tungstenite::connect_async(req).await;
    assert!(client_result.is_err(), "client upgrade should be refused");

    let server_result = server_handle.await.unwrap();
    assert!(
        matches!(server_result, Err(TransportError::Rejected(_))),
        "server should report a rejected handshake"
    );
}

#[tokio::test]
async fn test_websocket_accepts_matching_origin() {
    let (mut transport, addr) =
        bind_transport(Some("http://app.example")).await;

    let server_handle = tokio::spawn(async move { transport.accept().await });

    let mut req = format!("ws://{addr}")
        .into_client_request()
        .expect("valid request");
    req.headers_mut().insert(
        "origin",
        HeaderValue::from_static("http://app.example"),
    );

    tokio_tungstenite::connect_async(req)
        .await
        .expect("client should connect");

    let server_conn = server_handle.await.unwrap().expect("should accept");
    assert!(server_conn.bearer_token().is_none());
}

#[tokio::test]
async fn test_websocket_captures_authorization_bearer_token() {
    let (mut transport, addr) = bind_transport(None).await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let mut req = format!("ws://{addr}")
        .into_client_request()
        .expect("valid request");
    req.headers_mut().insert(
        "authorization",
        HeaderValue::from_static("Bearer tok-123"),
    );

    tokio_tungstenite::connect_async(req)
        .await
        .expect("client should connect");

    let server_conn = server_handle.await.unwrap();
    assert_eq!(server_conn.bearer_token(), Some("tok-123"));
}
