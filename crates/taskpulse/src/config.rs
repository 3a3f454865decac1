//! Server configuration.

use std::time::Duration;

/// Configuration for the presence server.
///
/// The environment surface mirrors what the deployment actually tunes:
/// where to listen, which browser origin may connect, and the two
/// heartbeat knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the WebSocket listener to.
    pub bind_addr: String,

    /// Origin allowed to open connections. `None` disables the check
    /// (same-process clients, tests).
    pub allowed_origin: Option<String>,

    /// How long a connection may stay silent before the server closes
    /// it. Clients ping well inside this window, so an expiry means the
    /// peer is gone, not idle.
    pub idle_timeout: Duration,

    /// The interval clients are expected to ping at. Used to floor the
    /// idle timeout; a timeout shorter than one ping interval would cut
    /// off healthy clients.
    pub ping_interval: Duration,

    /// How long a new connection has to complete the authentication
    /// handshake before it is dropped.
    pub handshake_timeout: Duration,

    /// Capacity of each connection's outbound event queue. A connection
    /// that falls this far behind is forcibly closed rather than allowed
    /// to buffer without bound.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            allowed_origin: None,
            idle_timeout: Duration::from_millis(60_000),
            ping_interval: Duration::from_millis(25_000),
            handshake_timeout: Duration::from_secs(5),
            outbound_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Builds a config from the environment, falling back to defaults
    /// for anything unset or unparsable.
    ///
    /// Variables: `TASKPULSE_BIND_ADDR`, `TASKPULSE_ALLOWED_ORIGIN`,
    /// `TASKPULSE_IDLE_TIMEOUT_MS`, `TASKPULSE_PING_INTERVAL_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = std::env::var("TASKPULSE_BIND_ADDR")
            .unwrap_or(defaults.bind_addr);
        let allowed_origin = std::env::var("TASKPULSE_ALLOWED_ORIGIN").ok();
        let idle_timeout =
            env_millis("TASKPULSE_IDLE_TIMEOUT_MS", defaults.idle_timeout);
        let ping_interval =
            env_millis("TASKPULSE_PING_INTERVAL_MS", defaults.ping_interval);

        Self {
            bind_addr,
            allowed_origin,
            idle_timeout,
            ping_interval,
            ..defaults
        }
        .validated()
    }

    /// Clamps any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by the server builder. Rule: the idle
    /// timeout must cover at least two ping intervals, or healthy
    /// clients would be expired between probes.
    pub fn validated(mut self) -> Self {
        let floor = self.ping_interval * 2;
        if self.idle_timeout < floor {
            tracing::warn!(
                idle_ms = self.idle_timeout.as_millis() as u64,
                floor_ms = floor.as_millis() as u64,
                "idle timeout below two ping intervals, raising"
            );
            self.idle_timeout = floor;
        }
        self
    }
}

fn env_millis(var: &str, default: Duration) -> Duration {
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                tracing::warn!(var, raw, "not a millisecond count, using default");
                default
            }
        },
        Err(_) => default,
    }
}
