//! Per-backend rate limiting: sliding one-minute windows plus a minimum spacing

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiter over requests per minute, tokens per minute and request spacing
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    min_interval: Duration,
    last_requests: Mutex<VecDeque<Instant>>,
    token_usage: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            tokens_per_minute,
            min_interval: Duration::ZERO,
            last_requests: Mutex::new(VecDeque::new()),
            token_usage: Mutex::new(VecDeque::new()),
        }
    }

    /// Require at least `interval` between consecutive requests
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Wait until a request may be sent, then record it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut last = self.last_requests.lock().await;
                let now = Instant::now();
                prune(&mut last, now);

                match self.request_wait(&last, now) {
                    Some(wait) => wait,
                    None => {
                        last.push_back(now);
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// How long to wait before the next request, `None` if it may go now
    fn request_wait(&self, last: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        if let Some(&newest) = last.back() {
            let since = now.duration_since(newest);
            if since < self.min_interval {
                return Some(self.min_interval - since);
            }
        }

        if last.len() >= self.requests_per_minute as usize {
            if let Some(&oldest) = last.front() {
                let elapsed = now.duration_since(oldest);
                if elapsed < WINDOW {
                    return Some(WINDOW - elapsed + Duration::from_millis(10));
                }
            }
        }

        None
    }

    /// Record token usage for rate limiting
    pub async fn record_tokens(&self, tokens: u32) {
        let mut usage = self.token_usage.lock().await;
        let now = Instant::now();
        prune_usage(&mut usage, now);
        usage.push_back((now, tokens));
    }

    /// Tokens used in the last minute
    pub async fn current_token_usage(&self) -> u32 {
        let mut usage = self.token_usage.lock().await;
        prune_usage(&mut usage, Instant::now());
        usage.iter().map(|(_, t)| t).sum()
    }

    pub async fn has_token_capacity(&self, needed: u32) -> bool {
        if self.tokens_per_minute == 0 {
            return true;
        }
        let current = self.current_token_usage().await;
        current.saturating_add(needed) <= self.tokens_per_minute
    }

    /// Wait for token capacity
    pub async fn wait_for_token_capacity(&self, needed: u32) {
        // a single request larger than the whole budget would never fit
        let needed = needed.min(self.tokens_per_minute);
        while !self.has_token_capacity(needed).await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn prune(last: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = last.front() {
        if now.duration_since(front) > WINDOW {
            last.pop_front();
        } else {
            break;
        }
    }
}

fn prune_usage(usage: &mut VecDeque<(Instant, u32)>, now: Instant) {
    while let Some(&(time, _)) = usage.front() {
        if now.duration_since(time) > WINDOW {
            usage.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(5, 1000);

        // Should be able to make 5 requests immediately
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_min_interval_spaces_requests() {
        let limiter = RateLimiter::new(600, 0).with_min_interval(Duration::from_millis(50));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_token_recording() {
        let limiter = RateLimiter::new(60, 1000);

        limiter.record_tokens(100).await;
        limiter.record_tokens(200).await;

        assert_eq!(limiter.current_token_usage().await, 300);
        assert!(limiter.has_token_capacity(700).await);
        assert!(!limiter.has_token_capacity(701).await);
    }
}
