//! Pacing and backoff authority shared by every worker.
//!
//! Workers call `wait` before each request, `trigger` when the target throttles
//! them, and `mark_recovered` after a clean response. The variant is chosen once
//! from the configured mode.

mod rotating;
mod standard;

use std::sync::Arc;
use std::time::Duration;

pub use rotating::{ControlPort, RotatingThrottle, RotationSettings};
pub use standard::{StandardThrottle, ThrottleSnapshot, MAX_BACKOFF, MIN_THRESHOLD};

use crate::http::HttpClient;
use crate::{AttackConfig, ThrottleMode};

pub trait Throttle: Send + Sync {
    /// Blocks while the pool is paused, then paces and registers the request.
    fn wait(&self);

    /// Reports a throttling response. A no-op while already paused.
    fn trigger(&self);

    /// Reports a clean, non-throttled response.
    fn mark_recovered(&self);

    fn is_blocked(&self) -> bool;

    /// Number of times the pool has been paused.
    fn episodes(&self) -> u64;
}

pub type ThrottleRef = Arc<dyn Throttle>;

/// Used when the operator disables pacing.
pub struct NoLimitThrottle;

impl Throttle for NoLimitThrottle {
    fn wait(&self) {}
    fn trigger(&self) {}
    fn mark_recovered(&self) {}

    fn is_blocked(&self) -> bool {
        false
    }

    fn episodes(&self) -> u64 {
        0
    }
}

pub fn from_config(config: &AttackConfig, client: Arc<HttpClient>) -> ThrottleRef {
    match config.throttle_mode {
        ThrottleMode::NoLimit => Arc::new(NoLimitThrottle),
        ThrottleMode::Anonymity => Arc::new(RotatingThrottle::new(
            client,
            RotationSettings::from(&config.rotation),
        )),
        ThrottleMode::Standard => Arc::new(StandardThrottle::new(
            config.threshold,
            Duration::from_secs(config.initial_backoff),
        )),
    }
}
