//! Per-connection handler: handshake, writer task, and message routing.
//!
//! Each accepted connection gets two Tokio tasks: this handler running
//! the read loop, and a writer draining the connection's bounded
//! outbound queue to the wire. The flow is:
//!   1. Receive `authenticate` -> resolve token (frame field, else the
//!      upgrade's `Authorization` header)
//!   2. Verify token -> `UserIdentity` (no hub lock held across the await)
//!   3. Admit to the hub -> `server-info` is queued, user room joined
//!   4. Loop: decode frames -> reply or forward to the hub
//!
//! A handshake failure is terminal for the connection attempt: the error
//! frame is sent, the socket closed, and the connection never touches
//! the registry. After authentication, malformed frames are dropped and
//! the connection lives on; only transport errors and the idle timeout
//! end it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use taskpulse_presence::{TokenVerifier, UserIdentity};
use taskpulse_protocol::{
    ClientMessage, Codec, JsonCodec, ProtocolError, ServerMessage,
    epoch_millis,
};
use taskpulse_transport::{Connection, ConnectionId, WebSocketConnection};

use crate::TaskpulseError;
use crate::hub::EventHub;
use crate::server::ServerState;

/// Drop guard that tears a connection down when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock;
/// `disconnect` is idempotent, so the guard is safe alongside the
/// handler's explicit cleanup.
struct ConnectionGuard {
    conn_id: ConnectionId,
    hub: Arc<EventHub>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            hub.disconnect(conn_id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<V: TokenVerifier>(
    conn: WebSocketConnection,
    state: Arc<ServerState<V>>,
) -> Result<(), TaskpulseError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let identity = match perform_handshake(&conn, &state).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "handshake failed");
            let _ = conn.close().await;
            return Err(e);
        }
    };

    let conn = Arc::new(conn);
    let (sender, queue) = mpsc::channel(state.config.outbound_buffer);
    let writer = spawn_writer(Arc::clone(&conn), state.codec, queue);

    if let Err(e) = state
        .hub
        .connect(conn_id, identity.clone(), sender.clone())
        .await
    {
        drop(sender);
        let _ = writer.await;
        return Err(e.into());
    }
    let _guard = ConnectionGuard {
        conn_id,
        hub: Arc::clone(&state.hub),
    };

    read_loop(&conn, &state, &identity, &sender).await;

    state.hub.disconnect(conn_id).await;
    drop(sender);
    // Let the writer flush what was already queued, then close the socket.
    let _ = writer.await;
    Ok(())
}

/// Performs the handshake: receive `authenticate`, resolve and verify
/// the token, reject-and-close on any failure.
///
/// Token verification may hit an external store; it is awaited here,
/// before the connection holds any hub state.
async fn perform_handshake<V: TokenVerifier>(
    conn: &WebSocketConnection,
    state: &ServerState<V>,
) -> Result<UserIdentity, TaskpulseError> {
    let data = match timeout(state.config.handshake_timeout, conn.recv())
        .await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage(
                "handshake timed out".into(),
            )
            .into());
        }
    };

    let token = match state.codec.decode::<ClientMessage>(&data) {
        Ok(ClientMessage::Authenticate { token }) => {
            token.or_else(|| conn.bearer_token().map(str::to_string))
        }
        Ok(_) | Err(_) => {
            send_error(conn, &state.codec, 400, "expected authenticate")
                .await?;
            return Err(ProtocolError::InvalidMessage(
                "first message must be authenticate".into(),
            )
            .into());
        }
    };

    let Some(token) = token else {
        send_error(
            conn,
            &state.codec,
            401,
            "authentication token required",
        )
        .await?;
        return Err(taskpulse_presence::PresenceError::AuthFailed(
            "token required".into(),
        )
        .into());
    };

    match state.verifier.verify(&token).await {
        Ok(identity) => Ok(identity),
        Err(e) => {
            send_error(
                conn,
                &state.codec,
                401,
                "invalid authentication token",
            )
            .await?;
            Err(e.into())
        }
    }
}

/// The post-handshake read loop. Returns when the connection is done
/// for any reason; the caller owns cleanup.
async fn read_loop<V: TokenVerifier>(
    conn: &WebSocketConnection,
    state: &ServerState<V>,
    identity: &UserIdentity,
    sender: &mpsc::Sender<ServerMessage>,
) {
    let conn_id = conn.id();

    loop {
        let data = match timeout(state.config.idle_timeout, conn.recv())
            .await
        {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                return;
            }
            Err(_) => {
                tracing::info!(%conn_id, "connection idle timeout");
                return;
            }
        };

        let msg: ClientMessage = match state.codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(
                    %conn_id,
                    error = %e,
                    "dropping malformed message"
                );
                continue;
            }
        };

        match msg {
            ClientMessage::Ping => {
                // Liveness probe: reply on this connection only, no
                // presence or room state involved.
                if sender.send(ServerMessage::Pong).await.is_err() {
                    return;
                }
            }
            ClientMessage::CheckConnection => {
                let confirm = ServerMessage::ConnectionConfirmed {
                    user_id: identity.user_id.clone(),
                    socket_id: conn_id.to_string(),
                    server_time: epoch_millis(),
                };
                if sender.send(confirm).await.is_err() {
                    return;
                }
            }
            ClientMessage::JoinTask { task_id } => {
                state.hub.join_task(conn_id, task_id).await;
            }
            ClientMessage::LeaveTask { task_id } => {
                if let Err(e) =
                    state.hub.leave_task(conn_id, task_id).await
                {
                    tracing::debug!(
                        %conn_id,
                        error = %e,
                        "leave-task refused"
                    );
                }
            }
            ClientMessage::Authenticate { .. } => {
                // Identity is immutable for the connection's lifetime.
                tracing::debug!(
                    %conn_id,
                    "dropping repeated authenticate"
                );
            }
        }
    }
}

/// Spawns the writer task: drains the bounded outbound queue to the
/// wire, then closes the socket once every sender is gone.
fn spawn_writer(
    conn: Arc<WebSocketConnection>,
    codec: JsonCodec,
    mut queue: mpsc::Receiver<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let conn_id = conn.id();
        while let Some(msg) = queue.recv().await {
            let bytes = match codec.encode(&msg) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(
                        %conn_id,
                        error = %e,
                        "failed to encode outbound message"
                    );
                    continue;
                }
            };
            if let Err(e) = conn.send(&bytes).await {
                tracing::debug!(%conn_id, error = %e, "write failed");
                break;
            }
        }
        let _ = conn.close().await;
        tracing::debug!(%conn_id, "writer finished");
    })
}

/// Sends a `ServerMessage::Error` frame directly on the connection.
/// Only used during the handshake, before the writer task exists.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &JsonCodec,
    code: u16,
    message: &str,
) -> Result<(), TaskpulseError> {
    let msg = ServerMessage::Error {
        code,
        message: message.to_string(),
    };
    let bytes = codec.encode(&msg)?;
    conn.send(&bytes).await?;
    Ok(())
}
