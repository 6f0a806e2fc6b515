use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use nexora_protocol::SessionId;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    consecutive_failures: u32,
    window_start: Instant,
}

/// Per-file edit failure-rate breaker, keyed by `(session_id, file_path)`.
/// After `threshold` consecutive failures within `reset_window`, the
/// circuit opens for that file until a success resets it or the window
/// elapses.

pub struct EditCircuitBreaker {
    threshold: u32,
    reset_window: Duration,
    state: Mutex<HashMap<(SessionId, PathBuf), BreakerState>>,
}

impl Default for EditCircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_WINDOW)
    }
}

impl EditCircuitBreaker {
    pub fn new(threshold: u32, reset_window: Duration) -> Self {
        Self { threshold, reset_window, state: Mutex::new(HashMap::new()) }
    }

    /// Returns `Some(consecutive_failures)` when the circuit is open for
    /// this file and further edits should be rejected.
    pub fn check(&self, session_id: SessionId, path: &PathBuf) -> Option<u32> {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let key = (session_id, path.clone());
        if let Some(entry) = guard.get(&key) {
            if entry.window_start.elapsed() > self.reset_window {
                guard.remove(&key);
                return None;
            }
            if entry.consecutive_failures >= self.threshold {
                return Some(entry.consecutive_failures);
            }
        }
        None
    }

    pub fn record_failure(&self, session_id: SessionId, path: &PathBuf) {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let key = (session_id, path.clone());
        let now = Instant::now();
        let entry = guard.entry(key).or_insert(BreakerState { consecutive_failures: 0, window_start: now });
        if entry.window_start.elapsed() > self.reset_window {
            entry.consecutive_failures = 0;
            entry.window_start = now;
        }
        entry.consecutive_failures += 1;
    }

    pub fn record_success(&self, session_id: SessionId, path: &PathBuf) {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&(session_id, path.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = EditCircuitBreaker::new(3, Duration::from_secs(300));
        let session = SessionId::new();
        let path = PathBuf::from("/tmp/a.rs");

        for _ in 0..2 {
            breaker.record_failure(session, &path);
            assert!(breaker.check(session, &path).is_none());
        }
        breaker.record_failure(session, &path);
        assert_eq!(breaker.check(session, &path), Some(3));
    }

    #[test]
    fn success_resets_the_breaker() {
        let breaker = EditCircuitBreaker::new(2, Duration::from_secs(300));
        let session = SessionId::new();
        let path = PathBuf::from("/tmp/a.rs");

        breaker.record_failure(session, &path);
        breaker.record_failure(session, &path);
        assert!(breaker.check(session, &path).is_some());

        breaker.record_success(session, &path);
        assert!(breaker.check(session, &path).is_none());
    }

    #[test]
    fn window_elapsing_clears_the_breaker() {
        let breaker = EditCircuitBreaker::new(1, Duration::from_millis(1));
        let session = SessionId::new();
        let path = PathBuf::from("/tmp/a.rs");

        breaker.record_failure(session, &path);
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.check(session, &path).is_none());
    }
}
