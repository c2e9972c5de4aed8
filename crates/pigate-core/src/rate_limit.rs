//! Fixed-window rate limiter for abuse protection.
//!
//! Limits the number of calls per (source address, caller identity) within a
//! 60-second window. The window resets when it expires rather than sliding,
//! so a burst straddling a window boundary can briefly see up to twice the
//! ceiling.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::GatewayError;

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-key window state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// A fixed-window call counter keyed by source address and caller.
///
/// One mutex guards the whole table; it is held only for the
/// read-modify-write of a single bucket.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    buckets: Mutex<HashMap<(IpAddr, String), Bucket>>,
}

impl RateLimiter {
    /// Create a limiter allowing `per_minute` calls per key per window.
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    /// Count one call from `(source, identity)` against the current window.
    pub fn check(&self, source: IpAddr, identity: &str) -> Result<(), GatewayError> {
        self.check_at(source, identity, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(
        &self,
        source: IpAddr,
        identity: &str,
        now: Instant,
    ) -> Result<(), GatewayError> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| GatewayError::Config("rate limiter state poisoned".to_string()))?;

        let bucket = buckets
            .entry((source, identity.to_string()))
            .or_insert(Bucket {
                count: 0,
                window_start: now,
            });

        if bucket.count == 0 || now.saturating_duration_since(bucket.window_start) >= WINDOW {
            *bucket = Bucket {
                count: 1,
                window_start: now,
            };
            return Ok(());
        }

        bucket.count = bucket.count.saturating_add(1);
        if bucket.count > self.per_minute {
            tracing::warn!(source = %source, identity, "Rate limit exceeded");
            return Err(GatewayError::RateLimited);
        }
        Ok(())
    }

    /// Number of distinct keys seen so far.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn test_allows_up_to_ceiling() {
        let limiter = RateLimiter::new(5);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at(A, "api-key:0", now).is_ok());
        }
    }

    #[test]
    fn test_blocks_call_past_ceiling() {
        let limiter = RateLimiter::new(3);
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_at(A, "api-key:0", now).unwrap();
        }
        assert!(matches!(
            limiter.check_at(A, "api-key:0", now + Duration::from_secs(59)),
            Err(GatewayError::RateLimited)
        ));
    }

    #[test]
    fn test_fresh_window_always_allows_first_call() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        for _ in 0..10 {
            let _ = limiter.check_at(A, "u", start);
        }
        assert!(limiter.check_at(A, "u", start).is_err());
        assert!(limiter.check_at(A, "u", start + WINDOW).is_ok());
        assert!(limiter.check_at(A, "u", start + WINDOW).is_ok());
        assert!(limiter.check_at(A, "u", start + WINDOW).is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.check_at(A, "u", now).is_ok());
        assert!(limiter.check_at(A, "u", now).is_err());

        // Same caller from another address, and another caller from the
        // same address, each get their own bucket.
        assert!(limiter.check_at(B, "u", now).is_ok());
        assert!(limiter.check_at(A, "v", now).is_ok());
        assert_eq!(limiter.tracked_keys(), 3);
    }

    #[test]
    fn test_concurrent_bursts_are_not_undercounted() {
        let limiter = Arc::new(RateLimiter::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check(A, "burst").is_ok())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
