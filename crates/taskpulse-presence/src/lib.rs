//! Presence tracking and connection identity for Taskpulse.
//!
//! This crate answers two questions for the rest of the stack:
//!
//! 1. **Who is this connection?** — [`TokenVerifier`] resolves a credential
//!    to a [`UserIdentity`] during the handshake.
//! 2. **Who is reachable right now?** — [`ConnectionRegistry`] tracks live
//!    connections per user and derives [`PresenceTransition`]s from its own
//!    mutations, so online/offline edges fire exactly once per user no
//!    matter how many devices they have.
//!
//! # How it fits in the stack
//!
//! ```text
//! Hub (above)       <- wraps the registry in a mutex, fans transitions out
//! Presence (this)   <- identity + per-user connection bookkeeping
//! Protocol (below)  <- provides UserId; Transport provides ConnectionId
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod registry;

pub use auth::{TokenVerifier, UserIdentity};
pub use error::PresenceError;
pub use registry::{ConnectionRegistry, PresenceTransition};
