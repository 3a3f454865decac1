//! Unified error type for the Taskpulse server.

use taskpulse_presence::PresenceError;
use taskpulse_protocol::ProtocolError;
use taskpulse_room::RoomError;
use taskpulse_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `taskpulse` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TaskpulseError {
    /// A transport-level error (accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A presence-level error (auth, registration).
    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// A room-level error (membership).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// An I/O error (e.g. reading the local socket address).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpulse_transport::ConnectionId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let top: TaskpulseError = err.into();
        assert!(matches!(top, TaskpulseError::Transport(_)));
        assert!(top.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let top: TaskpulseError = err.into();
        assert!(matches!(top, TaskpulseError::Protocol(_)));
    }

    #[test]
    fn test_from_presence_error() {
        let err = PresenceError::AuthFailed("nope".into());
        let top: TaskpulseError = err.into();
        assert!(matches!(top, TaskpulseError::Presence(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::NotAMember(
            ConnectionId::new(1),
            taskpulse_room::RoomName::Task("t-1".into()),
        );
        let top: TaskpulseError = err.into();
        assert!(matches!(top, TaskpulseError::Room(_)));
    }
}
