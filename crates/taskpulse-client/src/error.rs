//! Error types for the client agent.

/// Errors surfaced through the client handle.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The agent task is no longer running (explicit shutdown, or the
    /// retry budget was spent). Commands can no longer be delivered;
    /// start a new client to reconnect.
    #[error("client agent has stopped")]
    AgentStopped,
}
