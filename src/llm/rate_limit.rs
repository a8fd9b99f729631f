//! Global LLM-call budget: a token bucket shared by every page task.
//!
//! The bucket has capacity `rate_limit_per_minute` and refills at
//! `rate_limit_per_minute / 60` tokens per second, expressed through a
//! `governor` direct limiter with a per-minute quota. `acquire()` suspends
//! the calling future via `until_ready()` — no polling loop — until a token
//! exists, which naturally spaces calls across all concurrent pages.
//!
//! One LLM call costs one token regardless of prompt size: the bucket
//! protects *call rate*, not byte rate. Tokens are spent at acquisition and
//! never returned, even if the call is later cancelled — a token models an
//! *attempted* call.

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide LLM call budget.
pub struct CallBudget {
    limiter: DirectLimiter,
    per_minute: u32,
}

impl CallBudget {
    /// Build a budget allowing `per_minute` calls per minute (minimum 1).
    pub fn new(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            per_minute: per_minute.max(1),
        }
    }

    /// The configured calls-per-minute ceiling.
    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    /// Suspend until a call slot is available, then consume it.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_completes_under_generous_quota() {
        // 600/min leaves plenty of burst; the first acquires return instantly.
        let budget = CallBudget::new(600);
        for _ in 0..5 {
            budget.acquire().await;
        }
    }

    #[tokio::test]
    async fn burst_up_to_capacity_is_immediate() {
        use std::time::Instant;
        let budget = CallBudget::new(60);
        let start = Instant::now();
        // A per-minute quota allows an initial burst of the full capacity.
        for _ in 0..10 {
            budget.acquire().await;
        }
        assert!(
            start.elapsed().as_millis() < 500,
            "burst within capacity should not block"
        );
    }

    #[test]
    fn zero_clamps_to_one() {
        let budget = CallBudget::new(0);
        assert_eq!(budget.per_minute(), 1);
    }
}
