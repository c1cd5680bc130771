//! Fixed-window connection limiter keyed by client address.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct RateLimiter {
    points: u32,
    window: Duration,
    hits: DashMap<IpAddr, (Instant, u32)>,
}

impl RateLimiter {
    pub fn new(points: u32, window: Duration) -> Self {
        Self {
            points,
            window,
            hits: DashMap::new(),
        }
    }

    /// Spends one point for `addr`. On rejection returns how long until
    /// the window resets.
    pub fn consume(&self, addr: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.hits.entry(addr).or_insert((now, 0));
        let (started, used) = &mut *entry;

        if now.duration_since(*started) >= self.window {
            *started = now;
            *used = 0;
        }
        if *used >= self.points {
            return Err(self.window.saturating_sub(now.duration_since(*started)));
        }
        *used += 1;
        Ok(())
    }

    /// Forgets addresses whose window has elapsed.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.hits
            .retain(|_, (started, _)| now.duration_since(*started) < self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn rejects_after_points_are_spent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(limiter.consume(addr).is_ok());
        assert!(limiter.consume(addr).is_ok());
        let retry = limiter.consume(addr).unwrap_err();
        assert!(retry <= Duration::from_secs(60));

        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.consume(other).is_ok());
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::ZERO);
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.consume(addr).is_ok());
        assert!(limiter.consume(addr).is_ok());
        limiter.sweep();
        assert!(limiter.hits.is_empty());
    }
}
