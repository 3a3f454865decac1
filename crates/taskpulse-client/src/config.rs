//! Client configuration and the reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

/// Configuration for the client agent.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the presence server, e.g. `ws://host:4000`.
    pub url: String,

    /// How many consecutive failed connection attempts before the agent
    /// gives up and parks in terminal `Disconnected`.
    pub max_reconnect_attempts: u32,

    /// Delay before the second connection attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,

    /// Ceiling for the exponential backoff.
    pub reconnect_max_delay: Duration,

    /// How often to send a liveness probe while connected.
    pub heartbeat_interval: Duration,

    /// How long to wait for the probe's `pong` before counting a miss.
    /// Must be shorter than the heartbeat interval.
    pub pong_timeout: Duration,

    /// How long a connection attempt (TCP + upgrade + authenticate) may
    /// take before it counts as failed.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    /// Creates a config for the given server URL with default timings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    /// Delay before the given (1-based) connection attempt: capped
    /// exponential, plus up to 25% jitter so a fleet of clients dropped
    /// by the same outage does not reconnect in lockstep.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let capped = self
            .reconnect_base_delay
            .saturating_mul(1u32 << exp)
            .min(self.reconnect_max_delay);
        let jitter_us =
            rand::rng().random_range(0..=capped.as_micros() as u64 / 4);
        capped + Duration::from_micros(jitter_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_millis(800),
            ..ClientConfig::new("ws://localhost:4000")
        }
    }

    #[test]
    fn test_backoff_first_attempt_starts_at_base() {
        let config = config();
        let delay = config.backoff_delay(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = config();
        let delay = config.backoff_delay(3);
        assert!(delay >= Duration::from_millis(400));
        assert!(delay <= Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = config();
        for attempt in [5, 10, 100, u32::MAX] {
            let delay = config.backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1_000));
        }
    }
}
