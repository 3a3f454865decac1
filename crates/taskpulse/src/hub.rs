//! The event hub: registry, rooms, and broadcast behind one lock.
//!
//! The hub owns all shared connection state. Connection handlers call in
//! to register, join rooms, and disconnect; the CRUD layer calls the
//! publish operations after a mutation commits. Every mutation and every
//! presence check happens inside one critical section, so a transition
//! can never be computed from a stale count.
//!
//! Delivery never blocks the hub: events are `try_send`-ed into each
//! connection's bounded queue. A closed queue (connection already dying)
//! is logged and skipped; a full queue means the consumer cannot keep up
//! and the connection is forcibly disconnected, freeing its resources
//! instead of buffering without bound.
//!
//! The single mutex is the first bottleneck to shard if connect/disconnect
//! volume ever demands it (per-user and per-room key locks would be the
//! next step); at the current scale one lock is simpler and correct.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use taskpulse_presence::{
    ConnectionRegistry, PresenceError, PresenceTransition, UserIdentity,
};
use taskpulse_protocol::{ServerMessage, TaskId, UserId, epoch_millis};
use taskpulse_room::{RoomError, RoomName, RoomRouter};
use taskpulse_transport::ConnectionId;

/// Sender half of a connection's bounded outbound queue. The receiving
/// end is drained by that connection's writer task.
pub type OutboundSender = mpsc::Sender<ServerMessage>;

/// All shared mutable state, guarded by the hub's mutex.
struct HubState {
    registry: ConnectionRegistry,
    rooms: RoomRouter,
    outbound: HashMap<ConnectionId, OutboundSender>,
}

/// The presence and broadcast service.
///
/// Constructed once at the composition root and shared as an
/// `Arc<EventHub>`: the server hands it to connection handlers, the CRUD
/// layer holds it for publishing. No global instance exists.
pub struct EventHub {
    state: Mutex<HubState>,
    /// Wall-clock start time, reported in `server-info`.
    started_at: u64,
    /// Monotonic start time, for uptime.
    started: Instant,
}

impl EventHub {
    /// Creates a new, empty hub. Server start time is captured here.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                registry: ConnectionRegistry::new(),
                rooms: RoomRouter::new(),
                outbound: HashMap::new(),
            }),
            started_at: epoch_millis(),
            started: Instant::now(),
        }
    }

    // -----------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------

    /// Admits an authenticated connection.
    ///
    /// Registers it, auto-joins its `user:<id>` room, pushes `server-info`
    /// to it, and publishes the user's `online` transition to the user
    /// room when this was their first connection.
    ///
    /// # Errors
    /// Returns [`PresenceError::AlreadyRegistered`] on a duplicate
    /// connection id.
    pub async fn connect(
        &self,
        conn_id: ConnectionId,
        identity: UserIdentity,
        sender: OutboundSender,
    ) -> Result<(), PresenceError> {
        let mut state = self.state.lock().await;

        let transition =
            state.registry.register(conn_id, identity.clone())?;
        state.outbound.insert(conn_id, sender);

        let user_room = RoomName::User(identity.user_id.clone());
        state.rooms.join(conn_id, user_room.clone());

        let mut victims = Vec::new();

        let info = self.server_info_snapshot(&state);
        victims.extend(Self::deliver(&state, conn_id, info));

        if let Some(PresenceTransition::CameOnline(user_id)) = transition {
            let msg = ServerMessage::ConnectionStatus {
                user_id,
                online: true,
            };
            victims.extend(Self::publish_room(&state, &user_room, &msg));
        }

        Self::reap(&mut state, victims);
        tracing::info!(%conn_id, user = %identity.email, "user connected");
        Ok(())
    }

    /// Tears down a connection: drops its outbound queue (terminating the
    /// writer task), removes it from every room, deregisters it, and
    /// publishes the user's `offline` transition if it was their last
    /// connection.
    ///
    /// Idempotent: calling it again for the same connection is a no-op.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let mut state = self.state.lock().await;
        let victims = Self::cleanup(&mut state, conn_id);
        Self::reap(&mut state, victims);
    }

    /// Subscribes a connection to a task room.
    ///
    /// Returns `true` if it was newly added, `false` for a repeat join or
    /// an unknown connection (which would otherwise leak membership with
    /// no disconnect to clean it up).
    pub async fn join_task(
        &self,
        conn_id: ConnectionId,
        task_id: TaskId,
    ) -> bool {
        let mut state = self.state.lock().await;
        if !state.outbound.contains_key(&conn_id) {
            tracing::warn!(%conn_id, %task_id, "join-task from unknown connection");
            return false;
        }
        let joined = state.rooms.join(conn_id, RoomName::Task(task_id.clone()));
        if joined {
            tracing::info!(%conn_id, %task_id, "joined task room");
        }
        joined
    }

    /// Unsubscribes a connection from a task room.
    ///
    /// Only `task:<id>` rooms are reachable from here; user rooms are
    /// lifecycle-managed and cannot be left by request.
    ///
    /// # Errors
    /// Returns [`RoomError::NotAMember`] if the connection was not
    /// subscribed.
    pub async fn leave_task(
        &self,
        conn_id: ConnectionId,
        task_id: TaskId,
    ) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        state.rooms.leave(conn_id, &RoomName::Task(task_id.clone()))?;
        tracing::info!(%conn_id, %task_id, "left task room");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Publish API (called by the CRUD layer; fire-and-forget)
    // -----------------------------------------------------------------

    /// Delivers an event to every connection of one user.
    pub async fn publish_to_user(&self, user_id: &UserId, msg: ServerMessage) {
        let mut state = self.state.lock().await;
        let victims = Self::publish_room(
            &state,
            &RoomName::User(user_id.clone()),
            &msg,
        );
        Self::reap(&mut state, victims);
    }

    /// Delivers an event to every connection subscribed to a task room.
    pub async fn publish_to_task(&self, task_id: &TaskId, msg: ServerMessage) {
        let mut state = self.state.lock().await;
        let victims = Self::publish_room(
            &state,
            &RoomName::Task(task_id.clone()),
            &msg,
        );
        Self::reap(&mut state, victims);
    }

    /// Delivers an event to the union of a user room and a task room.
    ///
    /// A connection present in both rooms receives the event exactly
    /// once: targets are deduplicated by connection id before any write.
    pub async fn publish_to_user_and_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
        msg: ServerMessage,
    ) {
        let mut state = self.state.lock().await;

        let mut targets: HashSet<ConnectionId> = state
            .rooms
            .members_of(&RoomName::User(user_id.clone()))
            .into_iter()
            .collect();
        targets.extend(
            state.rooms.members_of(&RoomName::Task(task_id.clone())),
        );

        let mut victims = Vec::new();
        for conn_id in targets {
            victims.extend(Self::deliver(&state, conn_id, msg.clone()));
        }
        Self::reap(&mut state, victims);
    }

    /// Announces a created task to its owner's devices.
    pub async fn task_created(
        &self,
        owner: &UserId,
        task: serde_json::Value,
    ) {
        tracing::info!(user = %owner, "emitting task created");
        self.publish_to_user(owner, ServerMessage::TaskCreated { task })
            .await;
    }

    /// Announces an updated task to its owner's devices and to everyone
    /// viewing the task.
    pub async fn task_updated(
        &self,
        owner: &UserId,
        task_id: &TaskId,
        task: serde_json::Value,
    ) {
        tracing::info!(user = %owner, %task_id, "emitting task updated");
        self.publish_to_user_and_task(
            owner,
            task_id,
            ServerMessage::TaskUpdated { task },
        )
        .await;
    }

    /// Announces a deleted task to its owner's devices and to everyone
    /// viewing the task.
    pub async fn task_deleted(&self, owner: &UserId, task_id: &TaskId) {
        tracing::info!(user = %owner, %task_id, "emitting task deleted");
        self.publish_to_user_and_task(
            owner,
            task_id,
            ServerMessage::TaskDeleted {
                task_id: task_id.clone(),
            },
        )
        .await;
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// The `server-info` event as of now.
    pub async fn server_info(&self) -> ServerMessage {
        let state = self.state.lock().await;
        self.server_info_snapshot(&state)
    }

    /// `true` if the user has at least one live connection.
    pub async fn is_user_online(&self, user_id: &UserId) -> bool {
        self.state.lock().await.registry.is_user_online(user_id)
    }

    /// Number of distinct users currently online.
    pub async fn connected_users(&self) -> usize {
        self.state.lock().await.registry.online_user_count()
    }

    /// Live connection ids for a user. Empty when offline.
    pub async fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.state.lock().await.registry.connections_of(user_id)
    }

    // -----------------------------------------------------------------
    // Internals (called with the state lock held)
    // -----------------------------------------------------------------

    fn server_info_snapshot(&self, state: &HubState) -> ServerMessage {
        ServerMessage::ServerInfo {
            server_start_time: self.started_at,
            server_uptime: self.started.elapsed().as_millis() as u64,
            connected_users: state.registry.online_user_count(),
        }
    }

    /// Queues one event for one connection. Returns the connection id if
    /// its queue overflowed and it must be closed.
    fn deliver(
        state: &HubState,
        conn_id: ConnectionId,
        msg: ServerMessage,
    ) -> Option<ConnectionId> {
        let sender = state.outbound.get(&conn_id)?;
        match sender.try_send(msg) {
            Ok(()) => None,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(%conn_id, "dropping event for closed connection");
                None
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    %conn_id,
                    "outbound queue full, force-closing connection"
                );
                Some(conn_id)
            }
        }
    }

    /// Queues an event for every member of a room, in member order for
    /// this one call. Returns the connections that overflowed.
    fn publish_room(
        state: &HubState,
        room: &RoomName,
        msg: &ServerMessage,
    ) -> Vec<ConnectionId> {
        let members = state.rooms.members_of(room);
        let mut victims = Vec::new();
        for conn_id in members {
            victims.extend(Self::deliver(state, conn_id, msg.clone()));
        }
        victims
    }

    /// Removes every trace of a connection. Returns further connections
    /// that overflowed while the offline transition was published.
    fn cleanup(
        state: &mut HubState,
        conn_id: ConnectionId,
    ) -> Vec<ConnectionId> {
        state.outbound.remove(&conn_id);
        state.rooms.leave_all(conn_id);

        let Some((identity, transition)) =
            state.registry.deregister(conn_id)
        else {
            return Vec::new();
        };

        tracing::info!(%conn_id, user = %identity.email, "user disconnected");

        if let Some(PresenceTransition::WentOffline(user_id)) = transition {
            let room = RoomName::User(user_id.clone());
            let msg = ServerMessage::ConnectionStatus {
                user_id,
                online: false,
            };
            return Self::publish_room(state, &room, &msg);
        }
        Vec::new()
    }

    /// Force-closes overflowed connections, following any overflow their
    /// own teardown causes. Each cleanup removes a connection, so the
    /// worklist terminates.
    fn reap(state: &mut HubState, mut victims: Vec<ConnectionId>) {
        while let Some(conn_id) = victims.pop() {
            victims.extend(Self::cleanup(state, conn_id));
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    fn cid(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn identity(user: &str) -> UserIdentity {
        UserIdentity {
            user_id: UserId::from(user),
            email: format!("{user}@example.test"),
        }
    }

    /// Connects a fake connection to the hub, returning the queue's
    /// receiving end (what the writer task would drain).
    async fn attach(
        hub: &EventHub,
        id: u64,
        user: &str,
        capacity: usize,
    ) -> Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(capacity);
        hub.connect(cid(id), identity(user), tx)
            .await
            .expect("connect should succeed");
        rx
    }

    /// Drains everything currently queued for a connection.
    fn drain(rx: &mut Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    // =====================================================================
    // connect()
    // =====================================================================

    #[tokio::test]
    async fn test_connect_pushes_server_info_then_online_status() {
        let hub = EventHub::new();

        let mut rx = attach(&hub, 1, "a", 8).await;

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert!(matches!(
            &msgs[0],
            ServerMessage::ServerInfo { connected_users: 1, .. }
        ));
        assert_eq!(
            msgs[1],
            ServerMessage::ConnectionStatus {
                user_id: UserId::from("a"),
                online: true,
            }
        );
    }

    #[tokio::test]
    async fn test_connect_second_device_emits_no_online_status() {
        let hub = EventHub::new();
        let mut rx1 = attach(&hub, 1, "a", 8).await;
        drain(&mut rx1);

        let mut rx2 = attach(&hub, 2, "a", 8).await;

        // The second connection sees only server-info.
        let msgs = drain(&mut rx2);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(&msgs[0], ServerMessage::ServerInfo { .. }));
        // And the first connection saw nothing new.
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn test_connect_duplicate_id_is_rejected() {
        let hub = EventHub::new();
        let _rx = attach(&hub, 1, "a", 8).await;

        let (tx, _rx2) = mpsc::channel(8);
        let result = hub.connect(cid(1), identity("a"), tx).await;

        assert!(matches!(
            result,
            Err(PresenceError::AlreadyRegistered(_))
        ));
    }

    // =====================================================================
    // disconnect()
    // =====================================================================

    #[tokio::test]
    async fn test_disconnect_removes_connection_everywhere() {
        let hub = EventHub::new();
        let _rx = attach(&hub, 1, "a", 8).await;
        hub.join_task(cid(1), TaskId::from("t-1")).await;

        hub.disconnect(cid(1)).await;

        assert!(!hub.is_user_online(&UserId::from("a")).await);
        assert!(hub.connections_of(&UserId::from("a")).await.is_empty());

        // A broadcast to any of its former rooms no longer reaches it.
        hub.publish_to_task(
            &TaskId::from("t-1"),
            ServerMessage::Pong,
        )
        .await;
        hub.publish_to_user(&UserId::from("a"), ServerMessage::Pong).await;
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_idempotent() {
        let hub = EventHub::new();
        let _rx = attach(&hub, 1, "a", 8).await;

        hub.disconnect(cid(1)).await;
        hub.disconnect(cid(1)).await;

        assert_eq!(hub.connected_users().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_last_device_drops_user_key() {
        let hub = EventHub::new();
        let _rx1 = attach(&hub, 1, "a", 8).await;
        let _rx2 = attach(&hub, 2, "a", 8).await;

        hub.disconnect(cid(1)).await;
        assert!(hub.is_user_online(&UserId::from("a")).await);

        hub.disconnect(cid(2)).await;
        assert!(!hub.is_user_online(&UserId::from("a")).await);
    }

    #[tokio::test]
    async fn test_disconnect_drops_outbound_sender() {
        let hub = EventHub::new();
        let mut rx = attach(&hub, 1, "a", 8).await;
        drain(&mut rx);

        hub.disconnect(cid(1)).await;

        // The writer side observes a closed channel once the hub lets go.
        assert!(rx.recv().await.is_none());
    }

    // =====================================================================
    // Task rooms
    // =====================================================================

    #[tokio::test]
    async fn test_join_task_then_leave_restores_membership() {
        let hub = EventHub::new();
        let mut rx = attach(&hub, 1, "a", 8).await;
        drain(&mut rx);

        assert!(hub.join_task(cid(1), TaskId::from("t-1")).await);
        hub.leave_task(cid(1), TaskId::from("t-1"))
            .await
            .expect("leave should succeed");

        hub.publish_to_task(&TaskId::from("t-1"), ServerMessage::Pong)
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_task_unknown_connection_is_refused() {
        let hub = EventHub::new();

        assert!(!hub.join_task(cid(99), TaskId::from("t-1")).await);
    }

    #[tokio::test]
    async fn test_leave_task_not_subscribed_returns_error() {
        let hub = EventHub::new();
        let _rx = attach(&hub, 1, "a", 8).await;

        let result = hub.leave_task(cid(1), TaskId::from("t-1")).await;

        assert!(matches!(result, Err(RoomError::NotAMember(_, _))));
    }

    // =====================================================================
    // Publish
    // =====================================================================

    #[tokio::test]
    async fn test_task_created_reaches_every_device_once() {
        let hub = EventHub::new();
        let mut rx1 = attach(&hub, 1, "a", 8).await;
        let mut rx2 = attach(&hub, 2, "a", 8).await;
        let mut rx_other = attach(&hub, 3, "b", 8).await;
        drain(&mut rx1);
        drain(&mut rx2);
        drain(&mut rx_other);

        let task = json!({"id": "t-1", "title": "ship it"});
        hub.task_created(&UserId::from("a"), task.clone()).await;

        for rx in [&mut rx1, &mut rx2] {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            assert_eq!(
                msgs[0],
                ServerMessage::TaskCreated { task: task.clone() }
            );
        }
        assert!(drain(&mut rx_other).is_empty());
    }

    #[tokio::test]
    async fn test_publish_to_user_and_task_deduplicates_by_connection() {
        let hub = EventHub::new();
        // Connection 1 is the owner AND is viewing the task: member of
        // both rooms in the union.
        let mut rx1 = attach(&hub, 1, "a", 8).await;
        hub.join_task(cid(1), TaskId::from("t-1")).await;
        // Connection 2 only views the task.
        let mut rx2 = attach(&hub, 2, "b", 8).await;
        hub.join_task(cid(2), TaskId::from("t-1")).await;
        drain(&mut rx1);
        drain(&mut rx2);

        hub.task_updated(
            &UserId::from("a"),
            &TaskId::from("t-1"),
            json!({"id": "t-1"}),
        )
        .await;

        assert_eq!(drain(&mut rx1).len(), 1, "owner+viewer gets it once");
        assert_eq!(drain(&mut rx2).len(), 1, "viewer gets it once");
    }

    #[tokio::test]
    async fn test_publish_preserves_order_within_a_room() {
        let hub = EventHub::new();
        let mut rx = attach(&hub, 1, "a", 8).await;
        drain(&mut rx);

        hub.task_created(&UserId::from("a"), json!({"id": "t-1"})).await;
        hub.task_deleted(&UserId::from("a"), &TaskId::from("t-1")).await;

        let msgs = drain(&mut rx);
        assert!(matches!(msgs[0], ServerMessage::TaskCreated { .. }));
        assert!(matches!(msgs[1], ServerMessage::TaskDeleted { .. }));
    }

    #[tokio::test]
    async fn test_publish_to_dead_connection_is_swallowed() {
        let hub = EventHub::new();
        let rx = attach(&hub, 1, "a", 8).await;
        drop(rx); // writer gone, channel closed

        // Must not panic or error: fire-and-forget.
        hub.publish_to_user(&UserId::from("a"), ServerMessage::Pong).await;
    }

    #[tokio::test]
    async fn test_overflowing_connection_is_force_closed() {
        let hub = EventHub::new();
        let mut rx = attach(&hub, 1, "a", 4).await;
        drain(&mut rx);

        // Fill the queue to capacity without draining, then overflow it.
        for _ in 0..5 {
            hub.publish_to_user(&UserId::from("a"), ServerMessage::Pong)
                .await;
        }

        // The fifth event overflowed: the connection was torn down.
        assert!(!hub.is_user_online(&UserId::from("a")).await);
        // The queued events are still drainable, then the channel ends.
        assert_eq!(drain(&mut rx).len(), 4);
        assert!(rx.recv().await.is_none());
    }

    // =====================================================================
    // server_info
    // =====================================================================

    #[tokio::test]
    async fn test_server_info_counts_distinct_users() {
        let hub = EventHub::new();
        let _rx1 = attach(&hub, 1, "a", 8).await;
        let _rx2 = attach(&hub, 2, "a", 8).await;
        let _rx3 = attach(&hub, 3, "b", 8).await;

        let info = hub.server_info().await;
        assert!(matches!(
            info,
            ServerMessage::ServerInfo { connected_users: 2, .. }
        ));
    }
}
