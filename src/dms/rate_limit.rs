//! Sustained/burst rate limiting for the DMS façade: default 100 req/s
//! sustained, burst 200, 429 on excess. Built on `governor`'s GCRA
//! limiter, the same crate the transport-network shaper's burst sizing
//! is modeled after.

use governor::{Quota, RateLimiter as GovernorLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;

pub struct RateLimiter {
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimiter {
    pub fn new(sustained_rps: u32, burst_rps: u32) -> Self {
        let per_second = NonZeroU32::new(sustained_rps.max(1)).unwrap_or(nonzero!(100u32));
        let burst = NonZeroU32::new(burst_rps.max(1)).unwrap_or(nonzero!(200u32));
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            inner: GovernorLimiter::direct(quota),
        }
    }

    pub async fn check(&self) -> bool {
        self.inner.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_capacity_allows_initial_requests() {
        let limiter = RateLimiter::new(1, 5);
        let mut allowed = 0;
        for _ in 0..5 {
            if limiter.check().await {
                allowed += 1;
            }
        }
        assert!(allowed >= 1);
    }
}
