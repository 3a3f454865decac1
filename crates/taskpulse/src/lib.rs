//! # Taskpulse
//!
//! Real-time presence and event-broadcast server for task boards.
//!
//! Taskpulse authenticates WebSocket clients, tracks which users are
//! reachable across all their devices, groups connections into rooms
//! (`user:<id>` and `task:<id>`), and fans domain events out to exactly
//! the connections that should see them. The HTTP CRUD layer stays
//! outside: after a mutation commits it calls the [`EventHub`] publish
//! operations, and delivery is best-effort from there.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use taskpulse::prelude::*;
//!
//! // Implement TokenVerifier for your credential store, then:
//! // let server = PresenceServer::builder()
//! //     .bind("0.0.0.0:4000")
//! //     .build(my_verifier)
//! //     .await?;
//! // let hub = server.hub(); // publish handle for the CRUD layer
//! // server.run().await
//! ```

mod config;
mod error;
mod handler;
mod hub;
mod server;

pub use config::ServerConfig;
pub use error::TaskpulseError;
pub use hub::{EventHub, OutboundSender};
pub use server::{PresenceServer, PresenceServerBuilder};

/// The types most consumers need, in one import.
pub mod prelude {
    pub use crate::{
        EventHub, PresenceServer, PresenceServerBuilder, ServerConfig,
        TaskpulseError,
    };
    pub use taskpulse_presence::{
        PresenceError, TokenVerifier, UserIdentity,
    };
    pub use taskpulse_protocol::{
        ClientMessage, ServerMessage, TaskId, UserId,
    };
    pub use taskpulse_room::RoomName;
    pub use taskpulse_transport::ConnectionId;
}
