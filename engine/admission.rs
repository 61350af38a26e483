use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Default admissions allowed per key per window.
pub const DEFAULT_QUOTA: u32 = 5;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

// Above this many tracked keys, expired slots are swept on the next admit.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct WindowSlot {
    started: Instant,
    admitted: u32,
}

/// Fixed-window admission control keyed by client identity.
///
/// State is process-local; one lock over the slot map makes the
/// check-and-increment atomic under concurrent requests for a key.
#[derive(Debug)]
pub struct RateLimiter {
    quota: u32,
    window: Duration,
    slots: Mutex<IndexMap<String, WindowSlot>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Creates a limiter with the given quota per window.
    #[must_use]
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota: quota.max(1),
            window,
            slots: Mutex::new(IndexMap::new()),
        }
    }

    /// Decides whether the keyed client may enter the pipeline.
    pub fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if slots.len() > SWEEP_THRESHOLD {
            let window = self.window;
            slots.retain(|_, slot| now.duration_since(slot.started) < window);
        }
        match slots.get_mut(key) {
            Some(slot) if now.duration_since(slot.started) < self.window => {
                if slot.admitted >= self.quota {
                    false
                } else {
                    slot.admitted += 1;
                    true
                }
            }
            Some(slot) => {
                slot.started = now;
                slot.admitted = 1;
                true
            }
            None => {
                slots.insert(
                    key.to_string(),
                    WindowSlot {
                        started: now,
                        admitted: 1,
                    },
                );
                true
            }
        }
    }

    /// Admissions allowed per window.
    #[must_use]
    pub const fn quota(&self) -> u32 {
        self.quota
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_admission_in_window_is_denied() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.admit("10.0.0.1"));
        }
        assert!(!limiter.admit("10.0.0.1"));
    }

    #[test]
    fn window_expiry_readmits() {
        let limiter = RateLimiter::new(2, Duration::from_millis(40));
        assert!(limiter.admit("k"));
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.admit("k"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
    }
}
