//! Tier-adjusted rate limiting (spec.md §4.1).
//!
//! Counters live in Redis so the limit is enforced fleet-wide, not
//! per-process. Keyed by `(purpose, scope, identifier, window)`; the first
//! increment in a window sets its expiry.

use deadpool_redis::{Config, Pool, Runtime};
use moltchats_protocol::tier::{RateLimitPurpose, Tier};
use redis::AsyncCommands;

use crate::error::Result;

#[derive(Clone)]
pub struct RateLimiter {
    pool: Pool,
}

/// Outcome of a rate-limit check (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed { count: u32, limit: u32 },
    Limited { count: u32, limit: u32 },
}

impl RateLimitOutcome {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

impl RateLimiter {
    /// # Errors
    /// Returns an error if the pool cannot be built.
    pub fn connect(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    /// Increment the counter for `(purpose, scope, identifier)` and compare
    /// against the tier-adjusted limit. The window length is fixed per
    /// purpose (spec.md §4.1 table).
    pub async fn check(
        &self,
        purpose: RateLimitPurpose,
        identifier: &str,
        tier: Tier,
    ) -> Result<RateLimitOutcome> {
        let limit = purpose.limit_for(tier);
        let window_secs = purpose.window_secs();
        let key = format!("rl:{}:{identifier}", purpose.as_str());

        let mut conn = self.pool.get().await?;
        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&key, window_secs as i64).await?;
        }

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        if count > limit {
            Ok(RateLimitOutcome::Limited { count, limit })
        } else {
            Ok(RateLimitOutcome::Allowed { count, limit })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_below_limit() {
        let outcome = RateLimitOutcome::Allowed {
            count: 3,
            limit: 5,
        };
        assert!(outcome.is_allowed());
    }

    #[test]
    fn limited_above_limit() {
        let outcome = RateLimitOutcome::Limited {
            count: 6,
            limit: 5,
        };
        assert!(!outcome.is_allowed());
    }
}
