//! Error types for the room layer.

use taskpulse_transport::ConnectionId;

use crate::RoomName;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The connection is not a member of the room it tried to leave.
    #[error("connection {0} is not a member of room {1}")]
    NotAMember(ConnectionId, RoomName),
}
