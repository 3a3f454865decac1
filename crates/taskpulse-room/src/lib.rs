//! Room-based subscription routing for Taskpulse.
//!
//! A room is a named subscriber group used to scope broadcast delivery:
//! publish to `user:<id>` to reach one user on every device, publish to
//! `task:<id>` to reach everyone currently viewing that task.
//!
//! # Key types
//!
//! - [`RoomName`] — the two room kinds (`user:` lifecycle-managed,
//!   `task:` client-managed)
//! - [`RoomRouter`] — membership bookkeeping and target resolution
//! - [`RoomError`] — what can go wrong

mod error;
mod router;

pub use error::RoomError;
pub use router::{RoomName, RoomRouter};
