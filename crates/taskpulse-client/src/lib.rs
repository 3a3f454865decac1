//! Client-side companion for the Taskpulse real-time service.
//!
//! The server end of the protocol forgets everything about a connection
//! the moment it drops; this crate carries the state that must survive:
//! the credential, the desired task-room subscriptions, and the
//! observers. A single sequential agent task maintains one logical
//! session across physical reconnects with capped-exponential backoff,
//! replays room subscriptions after every reconnect, and probes
//! liveness with a heartbeat.
//!
//! ```rust,no_run
//! use taskpulse_client::{ClientConfig, ClientEvent, SyncClient};
//!
//! # async fn example() {
//! let config = ClientConfig::new("ws://localhost:4000");
//! let (handle, mut events) = SyncClient::connect(config, "my-token");
//!
//! handle.join_task_room("t-1".into()).unwrap();
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::TaskUpdated { task } => println!("{task}"),
//!         ClientEvent::ReconnectFailed => break,
//!         _ => {}
//!     }
//! }
//! # }
//! ```

mod agent;
mod config;
mod error;
mod events;
mod state;

pub use agent::{ClientHandle, SyncClient};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientEvent, Subscription};
pub use state::{ConnectionState, HeartbeatState};
