use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Jitter delay inserted before each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    /// Inclusive `(min, max)` bounds in milliseconds; `None` when disabled.
    bounds: Option<(u64, u64)>,
}

impl RateLimiter {
    /// Callers validate `min_ms <= max_ms` at config load.
    pub fn new(enabled: bool, min_ms: u64, max_ms: u64) -> Self {
        debug_assert!(min_ms <= max_ms);
        RateLimiter {
            bounds: enabled.then_some((min_ms, max_ms)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bounds.is_some()
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match self.bounds {
            Some((min, max)) => Duration::from_millis(rng.gen_range(min..=max)),
            None => Duration::ZERO,
        }
    }

    /// Sleep for one freshly drawn delay. No-op when disabled.
    pub async fn pause(&self) {
        if !self.is_enabled() {
            return;
        }
        let delay = self.next_delay();
        debug!("delay: {:.3} second(s)", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delays_stay_within_bounds() {
        let limiter = RateLimiter::new(true, 500, 2000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let d = limiter.next_delay_with(&mut rng).as_millis();
            assert!((500..=2000).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn degenerate_range_is_fixed_delay() {
        let limiter = RateLimiter::new(true, 750, 750);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(limiter.next_delay_with(&mut rng), Duration::from_millis(750));
    }

    #[test]
    fn disabled_means_zero() {
        let limiter = RateLimiter::new(false, 500, 2000);
        assert!(!limiter.is_enabled());
        assert_eq!(limiter.next_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn disabled_pause_returns_immediately() {
        let start = std::time::Instant::now();
        RateLimiter::new(false, 500, 2000).pause().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
