//! Error types for the presence layer.

use taskpulse_transport::ConnectionId;

/// Errors that can occur during credential verification and registration.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The credential was missing, invalid, expired, or rejected by the
    /// [`TokenVerifier`](crate::TokenVerifier). Terminal for the
    /// connection attempt; the server never retries a handshake.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The connection id is already present in the registry. Connection
    /// ids are process-unique, so this indicates a lifecycle bug in the
    /// caller rather than a normal runtime condition.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}
