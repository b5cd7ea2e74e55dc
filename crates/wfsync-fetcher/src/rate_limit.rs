//! Token-bucket rate limiting with a global and a per-sender budget.

use crate::config::RateLimiterConfig;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Single token bucket refilled continuously at `rate` tokens per second.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            rate,
            burst,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available, without consuming any.
    pub fn available(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        (state.tokens + elapsed * self.rate).min(self.burst).floor() as u32
    }
}

/// Global bucket plus one lazily created bucket per sender.
///
/// A request is admitted only when both budgets have a token.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    global: TokenBucket,
    per_sender: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            global: TokenBucket::new(config.global_rps, config.global_burst),
            per_sender: DashMap::new(),
            config,
        }
    }

    pub fn allow(&self, sender: &str) -> bool {
        let sender_ok = self
            .per_sender
            .entry(sender.to_string())
            .or_insert_with(|| {
                TokenBucket::new(self.config.per_sender_rps, self.config.per_sender_burst)
            })
            .try_acquire();

        sender_ok && self.global.try_acquire()
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}
