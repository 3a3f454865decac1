//! The reconnection agent: one logical session over many transports.
//!
//! The agent is a single sequential task, so there is never more than
//! one connection attempt in flight for a session. It remembers which
//! task rooms the caller wants independent of transport state: the
//! server forgets memberships on disconnect, the agent replays them on
//! every reconnect.
//!
//! Transport drops and connect failures retry with capped-exponential
//! backoff up to a bound; a credential rejection is terminal right away
//! (retrying an invalid token cannot help). Exhausting the bound emits
//! exactly one `ReconnectFailed` and parks the agent in terminal
//! `Disconnected`.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use taskpulse_protocol::{
    ClientMessage, Codec, JsonCodec, ServerMessage, TaskId,
};

use crate::events::SubscriberRegistry;
use crate::{
    ClientConfig, ClientError, ClientEvent, ConnectionState,
    HeartbeatState, Subscription,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands from the handle to the agent task.
enum Command {
    JoinTask(TaskId),
    LeaveTask(TaskId),
    Ping,
    CheckConnection,
    Shutdown,
}

/// Why an established session ended.
enum SessionEnd {
    /// Explicit shutdown request; the agent exits without retrying.
    Shutdown,
    /// The server rejected our credential mid-session.
    AuthRejected(String),
    /// The transport dropped out from under us.
    Lost(String),
}

/// Why a connection attempt failed.
enum EstablishError {
    /// The server refused the credential. Terminal.
    AuthRejected(String),
    /// Anything else: unreachable server, refused upgrade, timeout.
    Failed(String),
}

/// Entry point for the client side of the protocol.
pub struct SyncClient;

impl SyncClient {
    /// Spawns the agent for one logical session and returns its handle
    /// plus a subscription registered before the first connection
    /// attempt, so no lifecycle event can be missed.
    ///
    /// The token is reused for every reconnect handshake; refreshing an
    /// expired token is the credential layer's concern, not ours.
    pub fn connect(
        config: ClientConfig,
        token: impl Into<String>,
    ) -> (ClientHandle, Subscription) {
        let (commands, command_queue) = mpsc::unbounded_channel();
        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected);
        let subscribers = SubscriberRegistry::new();
        let subscription = subscribers.subscribe();

        let agent = Agent {
            config,
            token: token.into(),
            commands: command_queue,
            state: state_tx,
            subscribers: Arc::clone(&subscribers),
            desired_rooms: HashSet::new(),
            codec: JsonCodec,
            heartbeat: HeartbeatState::default(),
        };
        let task = tokio::spawn(agent.run());

        let handle = ClientHandle {
            commands,
            state: state_rx,
            subscribers,
            task,
        };
        (handle, subscription)
    }
}

/// Control surface for a running agent.
///
/// Dropping the handle shuts the agent down (its command channel
/// closes); use [`shutdown`](Self::shutdown) to also wait for the exit.
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    subscribers: Arc<SubscriberRegistry>,
    task: tokio::task::JoinHandle<()>,
}

impl ClientHandle {
    /// Subscribes this session to a task room. Remembered across
    /// reconnects until [`leave_task_room`](Self::leave_task_room).
    pub fn join_task_room(
        &self,
        task_id: TaskId,
    ) -> Result<(), ClientError> {
        self.send(Command::JoinTask(task_id))
    }

    /// Unsubscribes this session from a task room.
    pub fn leave_task_room(
        &self,
        task_id: TaskId,
    ) -> Result<(), ClientError> {
        self.send(Command::LeaveTask(task_id))
    }

    /// Sends a liveness probe outside the regular heartbeat schedule.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.send(Command::Ping)
    }

    /// Asks the server to confirm session continuity; the answer
    /// arrives as [`ClientEvent::ConnectionConfirmed`].
    pub fn check_connection(&self) -> Result<(), ClientError> {
        self.send(Command::CheckConnection)
    }

    /// Registers another observer for this session's events.
    pub fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }

    /// The agent's current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A watch on the lifecycle state, for callers that want to await
    /// transitions instead of polling.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stops the agent and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::AgentStopped)
    }
}

/// The sequential state machine behind a [`ClientHandle`].
struct Agent {
    config: ClientConfig,
    token: String,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    subscribers: Arc<SubscriberRegistry>,
    /// Task rooms the caller wants, independent of transport state.
    desired_rooms: HashSet<TaskId>,
    codec: JsonCodec,
    heartbeat: HeartbeatState,
}

impl Agent {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut reconnecting = false;

        loop {
            attempt += 1;
            if reconnecting {
                self.set_state(ConnectionState::Reconnecting { attempt });
                self.emit(ClientEvent::ReconnectAttempt { attempt });
            } else {
                self.set_state(ConnectionState::Connecting);
            }

            match self.establish().await {
                Ok((mut ws, info)) => {
                    self.set_state(ConnectionState::Connected);
                    if reconnecting {
                        tracing::info!(attempt, "reconnected");
                        self.emit(ClientEvent::Reconnected { attempt });
                    } else {
                        self.emit(ClientEvent::Connected);
                    }
                    self.emit(info);
                    attempt = 0;
                    reconnecting = false;

                    if let Err(reason) = self.resubscribe(&mut ws).await {
                        self.emit(ClientEvent::Disconnected { reason });
                        reconnecting = true;
                        continue;
                    }

                    match self.drive(&mut ws).await {
                        SessionEnd::Shutdown => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        SessionEnd::AuthRejected(message) => {
                            tracing::warn!(
                                %message,
                                "server rejected credential"
                            );
                            self.emit(ClientEvent::AuthRejected {
                                message,
                            });
                            break;
                        }
                        SessionEnd::Lost(reason) => {
                            tracing::info!(
                                %reason,
                                "connection lost, will reconnect"
                            );
                            self.emit(ClientEvent::Disconnected {
                                reason,
                            });
                            reconnecting = true;
                        }
                    }
                }
                Err(EstablishError::AuthRejected(message)) => {
                    tracing::warn!(%message, "server rejected credential");
                    self.emit(ClientEvent::AuthRejected { message });
                    break;
                }
                Err(EstablishError::Failed(reason)) => {
                    tracing::debug!(
                        %reason,
                        attempt,
                        "connection attempt failed"
                    );
                    if attempt >= self.config.max_reconnect_attempts {
                        tracing::warn!(
                            attempts = attempt,
                            "reconnection failed, giving up"
                        );
                        self.emit(ClientEvent::ReconnectFailed);
                        break;
                    }
                    reconnecting = true;
                    if !self.wait_backoff(attempt).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// One connection attempt: TCP + upgrade, then the authentication
    /// handshake. Succeeds once the server answers with `server-info`.
    async fn establish(
        &mut self,
    ) -> Result<(Ws, ClientEvent), EstablishError> {
        let connect =
            tokio_tungstenite::connect_async(self.config.url.as_str());
        let (mut ws, _) =
            match time::timeout(self.config.handshake_timeout, connect)
                .await
            {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    return Err(EstablishError::Failed(e.to_string()));
                }
                Err(_) => {
                    return Err(EstablishError::Failed(
                        "connect timed out".into(),
                    ));
                }
            };

        let auth = ClientMessage::Authenticate {
            token: Some(self.token.clone()),
        };
        self.send_msg(&mut ws, &auth)
            .await
            .map_err(EstablishError::Failed)?;

        // A successful handshake is answered with `server-info`, a
        // failed one with a 401 `error` frame followed by a close.
        let deadline = Instant::now() + self.config.handshake_timeout;
        loop {
            let frame = match time::timeout_at(deadline, ws.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    return Err(EstablishError::Failed(e.to_string()));
                }
                Ok(None) => {
                    return Err(EstablishError::Failed(
                        "closed during handshake".into(),
                    ));
                }
                Err(_) => {
                    return Err(EstablishError::Failed(
                        "handshake timed out".into(),
                    ));
                }
            };

            let data = match frame {
                Message::Binary(data) => data.to_vec(),
                Message::Text(text) => text.as_bytes().to_vec(),
                Message::Close(_) => {
                    return Err(EstablishError::Failed(
                        "closed during handshake".into(),
                    ));
                }
                _ => continue,
            };

            match self.codec.decode::<ServerMessage>(&data) {
                Ok(ServerMessage::ServerInfo {
                    server_start_time,
                    server_uptime,
                    connected_users,
                }) => {
                    return Ok((
                        ws,
                        ClientEvent::ServerInfo {
                            server_start_time,
                            server_uptime,
                            connected_users,
                        },
                    ));
                }
                Ok(ServerMessage::Error { code: 401, message }) => {
                    return Err(EstablishError::AuthRejected(message));
                }
                Ok(ServerMessage::Error { code, message }) => {
                    return Err(EstablishError::Failed(format!(
                        "server error {code}: {message}"
                    )));
                }
                Ok(other) => {
                    tracing::debug!(
                        ?other,
                        "unexpected message during handshake"
                    );
                }
                Err(e) => {
                    return Err(EstablishError::Failed(e.to_string()));
                }
            }
        }
    }

    /// Replays every desired task room on a fresh transport. The server
    /// forgot the previous connection's memberships.
    async fn resubscribe(&mut self, ws: &mut Ws) -> Result<(), String> {
        let rooms: Vec<TaskId> =
            self.desired_rooms.iter().cloned().collect();
        for task_id in rooms {
            tracing::debug!(%task_id, "re-subscribing task room");
            let msg = ClientMessage::JoinTask { task_id };
            self.send_msg(ws, &msg).await?;
        }
        Ok(())
    }

    /// The connected loop: commands out, events in, heartbeat around.
    async fn drive(&mut self, ws: &mut Ws) -> SessionEnd {
        self.heartbeat = HeartbeatState::default();
        let mut probe = time::interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::JoinTask(task_id)) => {
                            self.desired_rooms.insert(task_id.clone());
                            let msg =
                                ClientMessage::JoinTask { task_id };
                            if let Err(e) =
                                self.send_msg(ws, &msg).await
                            {
                                return SessionEnd::Lost(e);
                            }
                        }
                        Some(Command::LeaveTask(task_id)) => {
                            self.desired_rooms.remove(&task_id);
                            let msg =
                                ClientMessage::LeaveTask { task_id };
                            if let Err(e) =
                                self.send_msg(ws, &msg).await
                            {
                                return SessionEnd::Lost(e);
                            }
                        }
                        Some(Command::Ping) => {
                            if let Err(e) = self
                                .send_msg(ws, &ClientMessage::Ping)
                                .await
                            {
                                return SessionEnd::Lost(e);
                            }
                        }
                        Some(Command::CheckConnection) => {
                            let msg = ClientMessage::CheckConnection;
                            if let Err(e) =
                                self.send_msg(ws, &msg).await
                            {
                                return SessionEnd::Lost(e);
                            }
                        }
                        Some(Command::Shutdown) | None => {
                            return SessionEnd::Shutdown;
                        }
                    }
                }

                _ = probe.tick() => {
                    if let Err(e) =
                        self.send_msg(ws, &ClientMessage::Ping).await
                    {
                        return SessionEnd::Lost(e);
                    }
                    self.heartbeat
                        .probe_sent(std::time::Instant::now());
                    pong_deadline =
                        Some(Instant::now() + self.config.pong_timeout);
                }

                _ = time::sleep_until(
                    pong_deadline.unwrap_or_else(Instant::now)
                ), if pong_deadline.is_some() => {
                    pong_deadline = None;
                    let misses = self.heartbeat.probe_missed();
                    tracing::debug!(
                        misses,
                        "liveness probe went unanswered"
                    );
                    self.set_state(ConnectionState::Degraded);
                    self.emit(ClientEvent::HeartbeatMissed {
                        consecutive: misses,
                    });
                }

                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            if let Some(end) = self.handle_server_frame(
                                &data,
                                &mut pong_deadline,
                            ) {
                                return end;
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = self.handle_server_frame(
                                text.as_bytes(),
                                &mut pong_deadline,
                            ) {
                                return end;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Lost(
                                "connection closed by server".into(),
                            );
                        }
                        Some(Ok(_)) => {} // transport-level ping/pong
                        Some(Err(e)) => {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Decodes and dispatches one server frame. Returns `Some` when the
    /// frame ends the session.
    fn handle_server_frame(
        &mut self,
        data: &[u8],
        pong_deadline: &mut Option<Instant>,
    ) -> Option<SessionEnd> {
        let msg: ServerMessage = match self.codec.decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "dropping malformed server frame"
                );
                return None;
            }
        };

        match msg {
            ServerMessage::Pong => {
                *pong_deadline = None;
                if self.heartbeat.probe_acked(std::time::Instant::now())
                {
                    self.set_state(ConnectionState::Connected);
                }
                self.emit(ClientEvent::Pong);
            }
            ServerMessage::ServerInfo {
                server_start_time,
                server_uptime,
                connected_users,
            } => {
                self.emit(ClientEvent::ServerInfo {
                    server_start_time,
                    server_uptime,
                    connected_users,
                });
            }
            ServerMessage::ConnectionConfirmed {
                user_id,
                socket_id,
                server_time,
            } => {
                self.emit(ClientEvent::ConnectionConfirmed {
                    user_id,
                    socket_id,
                    server_time,
                });
            }
            ServerMessage::ConnectionStatus { user_id, online } => {
                self.emit(ClientEvent::PresenceChanged {
                    user_id,
                    online,
                });
            }
            ServerMessage::TaskCreated { task } => {
                self.emit(ClientEvent::TaskCreated { task });
            }
            ServerMessage::TaskUpdated { task } => {
                self.emit(ClientEvent::TaskUpdated { task });
            }
            ServerMessage::TaskDeleted { task_id } => {
                self.emit(ClientEvent::TaskDeleted { task_id });
            }
            ServerMessage::Error { code: 401, message } => {
                return Some(SessionEnd::AuthRejected(message));
            }
            ServerMessage::Error { code, message } => {
                tracing::warn!(code, %message, "server reported an error");
            }
        }
        None
    }

    /// Sleeps out the backoff before the next attempt, still servicing
    /// room bookkeeping so joins made while offline are remembered.
    /// Returns `false` if shutdown was requested.
    async fn wait_backoff(&mut self, attempt: u32) -> bool {
        let delay = self.config.backoff_delay(attempt);
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::JoinTask(task_id)) => {
                        self.desired_rooms.insert(task_id);
                    }
                    Some(Command::LeaveTask(task_id)) => {
                        self.desired_rooms.remove(&task_id);
                    }
                    // Nothing to probe while disconnected.
                    Some(Command::Ping)
                    | Some(Command::CheckConnection) => {}
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn send_msg(
        &self,
        ws: &mut Ws,
        msg: &ClientMessage,
    ) -> Result<(), String> {
        let bytes = self.codec.encode(msg).map_err(|e| e.to_string())?;
        ws.send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| e.to_string())
    }

    fn emit(&self, event: ClientEvent) {
        self.subscribers.broadcast(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}
