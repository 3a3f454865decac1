//! `PresenceServer` builder and accept loop.
//!
//! This is the entry point for running a Taskpulse server. It ties
//! together all the layers: transport -> protocol -> presence -> rooms.

use std::sync::Arc;

use taskpulse_presence::TokenVerifier;
use taskpulse_protocol::JsonCodec;
use taskpulse_transport::{Transport, TransportError, WebSocketTransport};

use crate::TaskpulseError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::hub::EventHub;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The hub
/// carries its own lock; everything else here is read-only after build.
pub(crate) struct ServerState<V: TokenVerifier> {
    pub(crate) hub: Arc<EventHub>,
    pub(crate) verifier: V,
    pub(crate) codec: JsonCodec,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a presence server.
///
/// # Example
///
/// ```rust,ignore
/// use taskpulse::prelude::*;
///
/// let server = PresenceServer::builder()
///     .bind("0.0.0.0:4000")
///     .build(my_verifier)
///     .await?;
/// let hub = server.hub(); // hand this to the CRUD layer
/// server.run().await
/// ```
pub struct PresenceServerBuilder {
    config: ServerConfig,
}

impl PresenceServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the server with the given credential verifier.
    ///
    /// Binds the WebSocket listener; the config is validated first so an
    /// out-of-range timeout cannot make it into a running server.
    ///
    /// # Errors
    /// Returns a transport error if the listener cannot bind.
    pub async fn build<V: TokenVerifier>(
        self,
        verifier: V,
    ) -> Result<PresenceServer<V>, TaskpulseError> {
        let config = self.config.validated();
        let transport = WebSocketTransport::bind(
            &config.bind_addr,
            config.allowed_origin.clone(),
        )
        .await?;

        let state = Arc::new(ServerState {
            hub: Arc::new(EventHub::new()),
            verifier,
            codec: JsonCodec,
            config,
        });

        Ok(PresenceServer { transport, state })
    }
}

impl Default for PresenceServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running presence and event-broadcast server.
///
/// Call [`run()`](Self::run) to start accepting connections. Grab the
/// hub with [`hub()`](Self::hub) first; it is the publish handle the
/// CRUD layer keeps after `run` consumes the server.
pub struct PresenceServer<V: TokenVerifier> {
    transport: WebSocketTransport,
    state: Arc<ServerState<V>>,
}

impl<V: TokenVerifier> PresenceServer<V> {
    /// Creates a new builder.
    pub fn builder() -> PresenceServerBuilder {
        PresenceServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The event hub: the publish API handed to the CRUD layer at the
    /// composition root. There is no global instance; every collaborator
    /// gets this `Arc` explicitly.
    pub fn hub(&self) -> Arc<EventHub> {
        Arc::clone(&self.state.hub)
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Rejected upgrades (disallowed origin) are logged and the loop
    /// keeps accepting. Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), TaskpulseError> {
        tracing::info!("presence server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(TransportError::Rejected(reason)) => {
                    tracing::debug!(%reason, "upgrade rejected");
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
