//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// The upgrade handshake enforces the cross-origin policy: when an allowed
/// origin is configured, requests whose `Origin` header is absent or
/// different are answered with `403` and never become connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    allowed_origin: Option<String>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    ///
    /// `allowed_origin` of `None` disables the origin check (same-process
    /// clients, tests).
    pub async fn bind(
        addr: &str,
        allowed_origin: Option<String>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            allowed_origin,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        // The upgrade callback runs before the connection exists: it is
        // the only chance to see the request headers, so the origin check
        // and the bearer-credential capture both live here.
        let allowed_origin = self.allowed_origin.clone();
        let mut bearer_token: Option<String> = None;
        let callback = |req: &Request,
                        resp: Response|
         -> Result<Response, ErrorResponse> {
            if let Some(allowed) = &allowed_origin {
                let origin = req
                    .headers()
                    .get("origin")
                    .and_then(|v| v.to_str().ok());
                if origin != Some(allowed.as_str()) {
                    tracing::warn!(
                        ?origin,
                        allowed,
                        "rejecting upgrade: origin not allowed"
                    );
                    let mut reject = ErrorResponse::new(Some(
                        "origin not allowed".to_string(),
                    ));
                    *reject.status_mut() =
                        tungstenite::http::StatusCode::FORBIDDEN;
                    return Err(reject);
                }
            }

            bearer_token = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);

            Ok(resp)
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(resp) => TransportError::Rejected(
                    format!("upgrade refused with status {}", resp.status()),
                ),
                other => TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    other,
                )),
            })?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        // Split the stream so sends and receives never contend: the read
        // loop can park on `recv` while a writer task keeps sending.
        let (sink, stream) = ws.split();

        Ok(WebSocketConnection {
            id,
            bearer_token,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single accepted WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    bearer_token: Option<String>,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// The bearer credential from the upgrade request's `Authorization`
    /// header, if one was sent. Used as the handshake token fallback when
    /// the client's `authenticate` frame carries none.
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
