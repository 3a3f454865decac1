//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a protocol type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a protocol type).
    /// Common causes: malformed JSON, an unknown `type` tag, or a
    /// missing required field.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but violates protocol rules, e.g. a second
    /// `authenticate` frame on an already-authenticated connection.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
