//! Per-user activation debounce

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Entries older than the window are dropped once the map grows past this
const PRUNE_THRESHOLD: usize = 10_000;

pub struct Debouncer {
    window: Duration,
    last_accepted: Mutex<HashMap<i64, Instant>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// True if this activation should be recorded. Suppressed activations
    /// do not extend the window.
    pub fn admit(&self, user_id: i64, now: Instant) -> bool {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(prev) = last.get(&user_id) {
            if now.saturating_duration_since(*prev) < self.window {
                return false;
            }
        }

        if last.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            last.retain(|_, seen| now.saturating_duration_since(*seen) < window);
        }
        last.insert(user_id, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppresses_within_window() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(debouncer.admit(1, t0));
        assert!(!debouncer.admit(1, t0 + Duration::from_millis(100)));
        assert!(!debouncer.admit(1, t0 + Duration::from_millis(499)));
        assert!(debouncer.admit(1, t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_users_are_independent() {
        let debouncer = Debouncer::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(debouncer.admit(1, t0));
        assert!(debouncer.admit(2, t0));
        assert!(!debouncer.admit(1, t0));
    }
}
