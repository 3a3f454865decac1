//! Wire protocol for Taskpulse.
//!
//! This crate defines the "language" the real-time client and server speak:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`UserId`],
//!   [`TaskId`]) — the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong doing so.
//!
//! The protocol layer sits between transport (raw frames) and the presence
//! layer (authenticated identity). It knows nothing about connections,
//! rooms, or users being online — only message shapes.
//!
//! ```text
//! Transport (bytes) -> Protocol (messages) -> Presence/Rooms (who gets what)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{ClientMessage, ServerMessage, TaskId, UserId, epoch_millis};
