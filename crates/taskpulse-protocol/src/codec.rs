//! Codec trait and the JSON implementation.
//!
//! A codec converts between protocol types and raw bytes. The rest of the
//! stack only sees the [`Codec`] trait, so the wire format stays swappable
//! (a compact binary codec could replace JSON without touching the server
//! or client loops).

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes protocol values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because the codec is shared across connection
/// tasks for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed,
    /// truncated, or don't match the expected shape.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// JSON keeps the wire human-readable: messages show up legibly in browser
/// dev tools and in logs, which matters far more for a presence channel
/// than the byte overhead does.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
