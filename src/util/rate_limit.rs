//! Rate limiting for relay connections

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Inbound relay messages per connection per second.
/// A well-behaved client sends ~3 snapshots/s plus occasional actions.
pub const RELAY_MESSAGE_RATE_LIMIT: u32 = 20;

/// Chat/emote actions per connection per second
pub const ACTION_RATE_LIMIT: u32 = 4;

/// Per-connection limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    message_limiter: Arc<Limiter>,
    action_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            message_limiter: create_limiter(RELAY_MESSAGE_RATE_LIMIT),
            action_limiter: create_limiter(ACTION_RATE_LIMIT),
        }
    }

    /// Check if any inbound message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }

    /// Check if a broadcast action is allowed
    pub fn check_action(&self) -> bool {
        self.action_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
