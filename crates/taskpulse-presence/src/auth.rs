//! Credential verification hook for admitting new connections.
//!
//! Taskpulse does not define a credential format. The store that issues
//! tokens (JWT, opaque session ids, whatever the HTTP layer uses) lives
//! outside this subsystem; all the handshake needs is a way to turn a
//! token string into an identity. That capability is the [`TokenVerifier`]
//! trait, and the handshake calls it exactly once per connection.

use taskpulse_protocol::UserId;

use crate::PresenceError;

/// The identity a connection is admitted under.
///
/// Resolved once at handshake time and immutable for the connection's
/// lifetime; there is no mid-session identity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// The user this connection belongs to.
    pub user_id: UserId,
    /// The user's email, carried for logging.
    pub email: String,
}

/// Validates a client's credential token and resolves their identity.
///
/// Verification may consult an external store, so it is async; callers
/// must not hold any registry lock across the await.
///
/// # Example
///
/// ```rust
/// use taskpulse_presence::{TokenVerifier, UserIdentity, PresenceError};
/// use taskpulse_protocol::UserId;
///
/// /// Accepts any token and uses it as the user id. Development only.
/// struct DevVerifier;
///
/// impl TokenVerifier for DevVerifier {
///     async fn verify(
///         &self,
///         token: &str,
///     ) -> Result<UserIdentity, PresenceError> {
///         if token.is_empty() {
///             return Err(PresenceError::AuthFailed("empty token".into()));
///         }
///         Ok(UserIdentity {
///             user_id: UserId(token.to_string()),
///             email: format!("{token}@example.test"),
///         })
///     }
/// }
/// ```
pub trait TokenVerifier: Send + Sync + 'static {
    /// Validates the given token.
    ///
    /// # Returns
    /// - `Ok(UserIdentity)` — the credential is valid, here is who it is
    /// - `Err(PresenceError::AuthFailed)` — invalid/expired/unknown
    fn verify(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<UserIdentity, PresenceError>> + Send;
}
