// island-registry-server/src/ratelimit.rs
// ============================================================================
// Module: Rate Limiter
// Description: Per-principal token-bucket admission with bounded state.
// Purpose: Keep one caller from starving the registry.
// Dependencies: island-registry-core
// ============================================================================

//! ## Overview
//! Each principal (or source IP for anonymous reads) owns a token bucket with
//! a fixed refill rate and burst capacity. Publishes draw more tokens than
//! reads. The bucket table is bounded: past the cap, idle buckets are evicted
//! before new ones are admitted, and an over-full table fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::config::RateLimitConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Idle duration after which a bucket may be evicted.
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(600);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Rolling state for a single rate limit key.
struct RateLimitBucket {
    /// Tokens currently available.
    tokens: f64,
    /// Last refill instant.
    last_update: Instant,
    /// Last request instant, for eviction.
    last_seen: Instant,
}

/// Decision returned by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Allow the request.
    Allow {
        /// Bucket capacity.
        limit: u32,
        /// Whole tokens remaining after this request.
        remaining: u32,
    },
    /// Deny the request until the bucket refills.
    Limited {
        /// Bucket capacity.
        limit: u32,
        /// Whole tokens remaining (zero or the shortfall).
        remaining: u32,
        /// Epoch second at which enough tokens will be available.
        reset_epoch_seconds: u64,
    },
    /// Deny because the bucket table is over capacity.
    OverCapacity,
}

/// Token-bucket rate limiter with per-key buckets.
pub struct RateLimiter {
    /// Limiter configuration.
    config: RateLimitConfig,
    /// Tokens per second refill rate.
    refill_per_second: f64,
    /// Per-key buckets.
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

impl RateLimiter {
    /// Creates a rate limiter from configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let refill_per_second = f64::from(config.requests_per_minute) / 60.0;
        Self {
            config,
            refill_per_second,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configured cost of a publish request.
    #[must_use]
    pub const fn publish_cost(&self) -> u32 {
        self.config.publish_cost
    }

    /// Checks the limiter for the given key, drawing `cost` tokens.
    pub fn check(&self, key: &str, cost: u32) -> RateLimitDecision {
        let now = Instant::now();
        let cost = f64::from(cost);
        let burst = f64::from(self.config.burst);

        let Ok(mut buckets) = self.buckets.lock() else {
            return RateLimitDecision::OverCapacity;
        };

        if buckets.len() >= self.config.max_entries && !buckets.contains_key(key) {
            buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) <= BUCKET_IDLE_TTL);
            if buckets.len() >= self.config.max_entries {
                return RateLimitDecision::OverCapacity;
            }
        }

        let bucket = buckets.entry(key.to_string()).or_insert(RateLimitBucket {
            tokens: burst,
            last_update: now,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(burst);
        bucket.last_update = now;
        bucket.last_seen = now;

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                reason = "tokens is clamped to burst, which fits in u32"
            )]
            let remaining = bucket.tokens.floor() as u32;
            return RateLimitDecision::Allow {
                limit: self.config.requests_per_minute,
                remaining,
            };
        }

        let shortfall = cost - bucket.tokens;
        let wait_seconds = (shortfall / self.refill_per_second).ceil();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "wait time is a small non-negative number of seconds"
        )]
        let reset_epoch_seconds = epoch_seconds().saturating_add(wait_seconds as u64);
        RateLimitDecision::Limited {
            limit: self.config.requests_per_minute,
            remaining: 0,
            reset_epoch_seconds,
        }
    }
}

/// Returns the current unix epoch in whole seconds.
fn epoch_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::panic,
        reason = "Test-only assertions are permitted."
    )]

    use super::*;

    fn limiter(burst: u32, max_entries: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst,
            publish_cost: 10,
            max_entries,
        })
    }

    #[test]
    fn burst_is_consumed_then_limited() {
        let limiter = limiter(3, 16);
        for _ in 0..3 {
            assert!(matches!(limiter.check("ip:1.2.3.4", 1), RateLimitDecision::Allow { .. }));
        }
        let decision = limiter.check("ip:1.2.3.4", 1);
        let RateLimitDecision::Limited { limit, remaining, reset_epoch_seconds } = decision else {
            panic!("expected limited, got {decision:?}");
        };
        assert_eq!(limit, 60);
        assert_eq!(remaining, 0);
        assert!(reset_epoch_seconds >= epoch_seconds());
    }

    #[test]
    fn publish_cost_drains_faster_than_reads() {
        let limiter = limiter(20, 16);
        assert!(matches!(limiter.check("token:abc", 10), RateLimitDecision::Allow { .. }));
        assert!(matches!(limiter.check("token:abc", 10), RateLimitDecision::Allow { .. }));
        assert!(matches!(limiter.check("token:abc", 10), RateLimitDecision::Limited { .. }));
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = limiter(1, 16);
        assert!(matches!(limiter.check("ip:a", 1), RateLimitDecision::Allow { .. }));
        assert!(matches!(limiter.check("ip:b", 1), RateLimitDecision::Allow { .. }));
        assert!(matches!(limiter.check("ip:a", 1), RateLimitDecision::Limited { .. }));
    }

    #[test]
    fn table_fails_closed_when_full_of_active_buckets() {
        let limiter = limiter(5, 2);
        assert!(matches!(limiter.check("ip:a", 1), RateLimitDecision::Allow { .. }));
        assert!(matches!(limiter.check("ip:b", 1), RateLimitDecision::Allow { .. }));
        assert!(matches!(limiter.check("ip:c", 1), RateLimitDecision::OverCapacity));
        // Existing buckets keep working.
        assert!(matches!(limiter.check("ip:a", 1), RateLimitDecision::Allow { .. }));
    }
}
