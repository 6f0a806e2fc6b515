//! External-connection manager: exponential-backoff reconnection
//! to MCP-style remote servers plus a health monitor that forces
//! reconnection after repeated probe failures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::config::Config;
use crate::error::NexoraErr;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disabled,
    Starting,
    Connected,
    Error,
}

const RETRYABLE_SUBSTRINGS: &[&str] = &["connection refused", "connection reset", "eof", "timeout", "temporary failure", "no such host", "network unreachable"];

/// Classifies a connect-failure message as retryable.

pub fn is_retryable(error_message: &str) -> bool {
    let lower = error_message.to_ascii_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Exponential backoff with a cap: `initial * multiplier^attempt`, capped.
pub fn backoff_delay(attempt: u32, config: &Config) -> Duration {
    let scaled = config.connection_retry_initial_backoff.as_secs_f64() * config.connection_retry_multiplier.powi(attempt as i32);
    Duration::from_secs_f64(scaled).min(config.connection_retry_cap)
}

struct ConnectionEntry {
    state: ConnectionState,
    consecutive_health_failures: u32,
    last_probe: Option<Instant>,
}

pub struct ConnectionManager {
    config: Config,
    connections: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Self {
        Self { config, connections: Mutex::new(HashMap::new()) }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnectionEntry>> {
        self.connections.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register(&self, name: &str) {
        self.guard().entry(name.to_string()).or_insert(ConnectionEntry { state: ConnectionState::Disabled, consecutive_health_failures: 0, last_probe: None });
    }

    pub fn state(&self, name: &str) -> Option<ConnectionState> {
        self.guard().get(name).map(|e| e.state)
    }

    fn set_state(&self, name: &str, state: ConnectionState) {
        let mut guard = self.guard();
        let entry = guard.entry(name.to_string()).or_insert(ConnectionEntry { state, consecutive_health_failures: 0, last_probe: None });
        entry.state = state;
    }

    /// Records a health-monitor probe result. Returns true when the caller
    /// should trigger a reconnection (3 consecutive failures by default).
    pub fn record_health_probe(&self, name: &str, healthy: bool) -> bool {
        let mut guard = self.guard();
        let entry = guard.entry(name.to_string()).or_insert(ConnectionEntry { state: ConnectionState::Connected, consecutive_health_failures: 0, last_probe: None });
        entry.last_probe = Some(Instant::now());
        if healthy {
            entry.consecutive_health_failures = 0;
            return false;
        }
        entry.consecutive_health_failures += 1;
        if entry.consecutive_health_failures >= self.config.connection_health_failures_before_reconnect {
            entry.state = ConnectionState::Error;
            return true;
        }
        false
    }

    /// Drives `connect` through the retry policy: initial backoff 1s,
    /// multiplier 2, cap 30s, up to `connection_retry_max_attempts` tries,
    /// only retrying errors classified as retryable.
    pub async fn connect_with_retry<F, Fut>(&self, name: &str, mut connect: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), String>>,
    {
        self.set_state(name, ConnectionState::Starting);
        let mut attempt = 0u32;
        loop {
            match connect().await {
                Ok(()) => {
                    self.set_state(name, ConnectionState::Connected);
                    return Ok(());
                }
                Err(message) => {
                    attempt += 1;
                    if !is_retryable(&message) || attempt >= self.config.connection_retry_max_attempts {
                        self.set_state(name, ConnectionState::Error);
                        return Err(NexoraErr::ConnectionFailed { target: name.to_string(), detail: message });
                    }
                    tokio::time::sleep(backoff_delay(attempt - 1, &self.config)).await;
                }
            }
        }
    }
}
