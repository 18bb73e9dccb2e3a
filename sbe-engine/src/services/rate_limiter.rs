//! Token-bucket rate limiter for analysis calls
//!
//! Budget: `max_calls` per rolling `window`. Tokens refill continuously at one
//! per `window / max_calls` and accumulate up to `max_calls`.
//!
//! **Algorithm:**
//! - Bucket state is a theoretical arrival time (`tat`): the instant the bucket
//!   would be full again. A call conforms once `now >= tat - (max_calls-1)*interval`.
//! - A fresh limiter holds one token, so pacing starts steady.
//! - The last `max_calls` grant instants are kept; a grant is refused while the
//!   oldest of them is younger than `window`. This caps any window at
//!   `max_calls` grants even when a full bucket and its refill overlap.
//!
//! The state mutex is held across the wait, so callers are served in FIFO
//! order. Dropping an `acquire` future mid-wait consumes nothing.
//!
//! Not `governor`: its GCRA alone lets a full burst plus refill exceed
//! `max_calls` inside one window, and its clock does not follow paused
//! tokio time in tests.

use sbe_common::config::RateLimitConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tat: Instant,
    grants: VecDeque<Instant>,
}

/// Rate limiter shared by every dispatch drawing on one provider quota
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    interval: Duration,
    /// Burst tolerance, `(max_calls - 1) * interval`
    tolerance: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let max_calls = config.max_calls.max(1);
        let interval = config.interval();
        let tolerance = interval.saturating_mul(max_calls - 1);

        Self {
            config,
            interval,
            tolerance,
            state: Mutex::new(BucketState {
                tat: Instant::now() + tolerance,
                grants: VecDeque::with_capacity(max_calls as usize),
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait until a call is permitted, then consume it
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let ready_at = self.ready_at(&state, now);
            if ready_at <= now {
                self.grant(&mut state, now);
                return;
            }

            tracing::debug!(
                wait_ms = (ready_at - now).as_millis() as u64,
                max_calls = self.config.max_calls,
                window_secs = self.config.window_secs,
                "Rate limiting: waiting for permit"
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Consume a permit if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if self.ready_at(&state, now) <= now {
            self.grant(&mut state, now);
            true
        } else {
            false
        }
    }

    /// Earliest instant the next call conforms to both rules
    fn ready_at(&self, state: &BucketState, now: Instant) -> Instant {
        let bucket_ready = state.tat.checked_sub(self.tolerance).unwrap_or(now);

        let window_ready = if state.grants.len() >= self.config.max_calls.max(1) as usize {
            state.grants.front().map(|oldest| *oldest + self.config.window())
        } else {
            None
        };

        match window_ready {
            Some(w) => bucket_ready.max(w),
            None => bucket_ready,
        }
    }

    fn grant(&self, state: &mut BucketState, now: Instant) {
        state.tat = state.tat.max(now) + self.interval;
        state.grants.push_back(now);
        while state.grants.len() > self.config.max_calls.max(1) as usize {
            state.grants.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(max_calls: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::new(max_calls, Duration::from_secs(window_secs)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_limiter_paces_steadily() {
        let limiter = limiter(5, 60);
        let start = Instant::now();

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(12));

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_tokens_saturate_at_max_calls() {
        let limiter = limiter(5, 60);
        tokio::time::sleep(Duration::from_secs(600)).await;

        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        // Sixth call waits for the window that began with the burst
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_budget() {
        let limiter = Arc::new(limiter(3, 10));
        tokio::time::sleep(Duration::from_secs(30)).await;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        let window = Duration::from_secs(10);
        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..].iter().take_while(|t| **t < *start + window).count();
            assert!(in_window <= 3, "{} grants within one window", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_consumes_nothing() {
        let limiter = limiter(1, 2);
        limiter.acquire().await;

        let waited = tokio::time::timeout(Duration::from_millis(500), limiter.acquire()).await;
        assert!(waited.is_err());

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }
}
