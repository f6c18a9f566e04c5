//! Rate limiting utilities

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

/// Axes updates per second; clients send these every frame
pub const AXES_RATE_LIMIT: u32 = 60;

/// Discrete actions, pings and join/leave per second
pub const ACTION_RATE_LIMIT: u32 = 20;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct PlayerRateLimiter {
    axes_limiter: Arc<Limiter>,
    action_limiter: Arc<Limiter>,
}

impl PlayerRateLimiter {
    pub fn new() -> Self {
        Self {
            axes_limiter: create_limiter(AXES_RATE_LIMIT),
            action_limiter: create_limiter(ACTION_RATE_LIMIT),
        }
    }

    /// Check if an axes update is allowed (returns true if allowed)
    pub fn check_axes(&self) -> bool {
        self.axes_limiter.check().is_ok()
    }

    /// Check if any other client message is allowed
    pub fn check_action(&self) -> bool {
        self.action_limiter.check().is_ok()
    }
}

impl Default for PlayerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
