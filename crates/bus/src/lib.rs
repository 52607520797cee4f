//! Cross-instance pub/sub, presence tracking, and rate-limit counters
//! (spec.md §4.1, §4.4, §4.5).

pub mod error;
pub mod presence;
pub mod pubsub;
pub mod ratelimit;

pub use error::{BusError, Result};
pub use presence::PresenceRegistry;
pub use pubsub::Bus;
pub use ratelimit::{RateLimitOutcome, RateLimiter};
