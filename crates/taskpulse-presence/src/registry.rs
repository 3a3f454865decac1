//! The connection registry: who is connected, and through which sockets.
//!
//! The registry is the single source of truth for presence. It keeps the
//! connection -> identity and user -> connections indexes in sync, and it
//! reports presence transitions from the same mutation that caused them,
//! so a caller can never observe a stale count between "mutate" and
//! "did the user just come online".
//!
//! # Concurrency note
//!
//! `ConnectionRegistry` is NOT thread-safe by itself — plain `HashMap`s,
//! single owner. The hub wraps it (together with the room router) in one
//! mutex, which is what makes register/deregister plus the transition
//! check a single critical section.

use std::collections::{HashMap, HashSet};

use taskpulse_protocol::UserId;
use taskpulse_transport::ConnectionId;

use crate::{PresenceError, UserIdentity};

/// A presence transition derived from a registry mutation.
///
/// Emitted at most once per user per edge: `CameOnline` exactly when the
/// user's connection count goes 0 -> 1, `WentOffline` exactly when it
/// goes 1 -> 0. Intermediate counts (a second tab opening, one of three
/// devices dropping) produce no transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    /// The user's first connection arrived.
    CameOnline(UserId),
    /// The user's last connection left.
    WentOffline(UserId),
}

/// Tracks all live, authenticated connections.
///
/// Unauthenticated connections never appear here: the lifecycle handler
/// only registers a connection after the handshake resolved an identity.
///
/// ## Invariant
///
/// A `UserId` key exists in the user index iff that user has at least one
/// live connection. The two indexes are mutated together and never
/// disagree.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// connection -> identity (O(1) lookup for inbound messages).
    connections: HashMap<ConnectionId, UserIdentity>,
    /// user -> live connections (O(1) lookup for targeted delivery).
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection under its identity.
    ///
    /// Returns `Some(PresenceTransition::CameOnline)` when this is the
    /// user's first live connection, `None` otherwise.
    ///
    /// # Errors
    /// Returns [`PresenceError::AlreadyRegistered`] if the connection id
    /// is already present.
    pub fn register(
        &mut self,
        conn_id: ConnectionId,
        identity: UserIdentity,
    ) -> Result<Option<PresenceTransition>, PresenceError> {
        if self.connections.contains_key(&conn_id) {
            return Err(PresenceError::AlreadyRegistered(conn_id));
        }

        let user_id = identity.user_id.clone();
        self.connections.insert(conn_id, identity);

        let conns = self.users.entry(user_id.clone()).or_default();
        conns.insert(conn_id);
        let transition = if conns.len() == 1 {
            Some(PresenceTransition::CameOnline(user_id.clone()))
        } else {
            None
        };

        tracing::debug!(
            %conn_id,
            %user_id,
            connections = conns.len(),
            "connection registered"
        );
        Ok(transition)
    }

    /// Removes a connection from the registry.
    ///
    /// Idempotent: returns `None` if the connection was never registered
    /// or was already removed. Otherwise returns the identity it was
    /// registered under and, when this was the user's last connection,
    /// the `WentOffline` transition. The user key is deleted in the same
    /// mutation, upholding the registry invariant.
    pub fn deregister(
        &mut self,
        conn_id: ConnectionId,
    ) -> Option<(UserIdentity, Option<PresenceTransition>)> {
        let identity = self.connections.remove(&conn_id)?;
        let user_id = identity.user_id.clone();

        let transition = match self.users.get_mut(&user_id) {
            Some(conns) => {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    self.users.remove(&user_id);
                    Some(PresenceTransition::WentOffline(user_id.clone()))
                } else {
                    None
                }
            }
            // Unreachable while the invariant holds, but losing one index
            // entry must not wedge cleanup of the other.
            None => None,
        };

        tracing::debug!(%conn_id, %user_id, "connection deregistered");
        Some((identity, transition))
    }

    /// All live connection ids for a user. Empty when the user is offline.
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.users
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The identity a connection was registered under.
    pub fn identity_of(
        &self,
        conn_id: ConnectionId,
    ) -> Option<&UserIdentity> {
        self.connections.get(&conn_id)
    }

    /// `true` if the user has at least one live connection.
    pub fn is_user_online(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Number of distinct users currently online.
    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    /// Total number of live connections (across all users).
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

// =========================================================================
// Tests
// =========================================================================
