use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Sliding-window limiter for locally originated chat messages.
///
/// Keeps the send times inside the window; a send is admitted only while
/// fewer than `max` of them remain.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    max: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            sent: VecDeque::new(),
        }
    }

    /// Record a send at `now` if the window has room.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.sent.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            self.sent.pop_front();
        }

        if self.sent.len() >= self.max {
            return false;
        }

        self.sent.push_back(now);
        true
    }

    /// Sends still counted against the window as of `now`.
    pub fn in_window(&self, now: Instant) -> usize {
        self.sent
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_burst() {
        let mut limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.try_acquire(now));
        }

        assert!(!limiter.try_acquire(now));
        assert_eq!(limiter.in_window(now), 5);
    }

    #[test]
    fn test_rejected_attempts_do_not_count() {
        let mut limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.try_acquire(start));
        assert!(limiter.try_acquire(start + Duration::from_secs(1)));
        for s in 2..9 {
            assert!(!limiter.try_acquire(start + Duration::from_secs(s)));
        }

        // the first send ages out at exactly 10s
        assert!(limiter.try_acquire(start + Duration::from_secs(10)));
        assert!(!limiter.try_acquire(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_huge_limit_does_not_preallocate() {
        let mut limiter = SlidingWindowLimiter::new(usize::MAX, Duration::from_secs(10));
        let now = Instant::now();

        for _ in 0..100 {
            assert!(limiter.try_acquire(now));
        }
        assert_eq!(limiter.in_window(now), 100);
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();

        for s in 0..5 {
            assert!(limiter.try_acquire(start + Duration::from_secs(s)));
        }
        assert!(!limiter.try_acquire(start + Duration::from_millis(9_999)));
        assert!(limiter.try_acquire(start + Duration::from_secs(10)));
        assert!(!limiter.try_acquire(start + Duration::from_millis(10_500)));
        assert!(limiter.try_acquire(start + Duration::from_secs(11)));
    }
}
