//! The room router: name-addressed subscriber groups.
//!
//! A room is nothing but a set of connection ids under a name. The router
//! keeps the forward (room -> members) and reverse (connection -> rooms)
//! indexes in sync so that disconnect cleanup is a single `leave_all`
//! call, not a scan of every room.
//!
//! Like the registry, the router is a plain single-owner structure; the
//! hub serializes access through its mutex.

use std::collections::{HashMap, HashSet};
use std::fmt;

use taskpulse_protocol::{TaskId, UserId};
use taskpulse_transport::ConnectionId;

use crate::RoomError;

/// A name-addressed subscriber group.
///
/// Two kinds exist:
/// - `User` rooms (`user:<id>`) target one user across all their devices.
///   Every connection is joined to its own user room by the lifecycle
///   layer at handshake time; clients cannot join or leave these.
/// - `Task` rooms (`task:<id>`) target everyone currently viewing a task.
///   Joined and left explicitly by client request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomName {
    /// All connections of one user.
    User(UserId),
    /// All connections currently subscribed to one task.
    Task(TaskId),
}

impl RoomName {
    /// `true` for lifecycle-managed `user:<id>` rooms.
    pub fn is_user_room(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Task(id) => write!(f, "task:{id}"),
        }
    }
}

/// Maintains the room membership mapping and resolves publish targets.
#[derive(Debug, Default)]
pub struct RoomRouter {
    /// room -> member connections.
    rooms: HashMap<RoomName, HashSet<ConnectionId>>,
    /// connection -> rooms it is a member of (for one-pass cleanup).
    memberships: HashMap<ConnectionId, HashSet<RoomName>>,
}

impl RoomRouter {
    /// Creates a new, empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room.
    ///
    /// Returns `true` if the connection was newly added, `false` if it
    /// was already a member (idempotent).
    pub fn join(&mut self, conn_id: ConnectionId, room: RoomName) -> bool {
        let added = self.rooms.entry(room.clone()).or_default().insert(conn_id);
        if added {
            self.memberships
                .entry(conn_id)
                .or_default()
                .insert(room.clone());
            tracing::debug!(%conn_id, %room, "joined room");
        }
        added
    }

    /// Removes a connection from a room.
    ///
    /// The room key is dropped as soon as its member set empties, so no
    /// stale room can accumulate.
    ///
    /// # Errors
    /// Returns [`RoomError::NotAMember`] if the connection was not in the
    /// room.
    pub fn leave(
        &mut self,
        conn_id: ConnectionId,
        room: &RoomName,
    ) -> Result<(), RoomError> {
        let members = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| RoomError::NotAMember(conn_id, room.clone()))?;
        if !members.remove(&conn_id) {
            return Err(RoomError::NotAMember(conn_id, room.clone()));
        }

        if members.is_empty() {
            self.rooms.remove(room);
        }
        if let Some(rooms) = self.memberships.get_mut(&conn_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(&conn_id);
            }
        }
        tracing::debug!(%conn_id, %room, "left room");
        Ok(())
    }

    /// Removes a connection from every room it is in, including its user
    /// room, in one pass. Returns the rooms it was removed from.
    ///
    /// Invoked on every disconnect. A miss on one room (already cleaned
    /// up) never prevents removal from the rest.
    pub fn leave_all(&mut self, conn_id: ConnectionId) -> Vec<RoomName> {
        let Some(rooms) = self.memberships.remove(&conn_id) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(rooms.len());
        for room in rooms {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
            left.push(room);
        }
        tracing::debug!(%conn_id, rooms = left.len(), "left all rooms");
        left
    }

    /// Member connections of a room. Empty when the room does not exist.
    pub fn members_of(&self, room: &RoomName) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection is a member of.
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<RoomName> {
        self.memberships
            .get(&conn_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `true` if the connection is a member of the room.
    pub fn is_member(&self, conn_id: ConnectionId, room: &RoomName) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&conn_id))
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of members in a room (0 when it does not exist).
    pub fn member_count(&self, room: &RoomName) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }
}

// =========================================================================
// Tests
// =========================================================================
