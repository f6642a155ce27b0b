//! Mapping from normalized input to volume actions
//!
//! Ticks pass the [`RateLimiter`] first, then the [`ActionDispatcher`] turns
//! them into [`ActionRequest`]s for the actuator.

pub mod dispatcher;

pub use dispatcher::{ActionDispatcher, ActionRequest};

use std::time::{Duration, Instant};

use crate::input::normalizer::NormalizedTick;

/// Debounce for knob ticks
///
/// Holds the only mutable state of the pipeline besides the stop token: the
/// time of the last admitted tick. Dropped ticks are forgotten, never queued
/// or added to the next admitted one.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Minimum time between admitted ticks
    min_interval: Duration,

    /// When the last admitted tick arrived
    last_action_time: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_action_time: None,
        }
    }

    pub fn from_millis(min_interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_interval_ms))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_action_time(&self) -> Option<Instant> {
        self.last_action_time
    }

    /// Admits `tick` if enough time has passed since the last admitted one
    ///
    /// A `now` earlier than the last action counts as no time elapsed, which
    /// keeps `last_action_time` from ever moving backwards.
    pub fn admit(&mut self, _tick: &NormalizedTick, now: Instant) -> bool {
        let admitted = match self.last_action_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        };
        if admitted {
            self.last_action_time = Some(match self.last_action_time {
                Some(last) => last.max(now),
                None => now,
            });
        }
        admitted
    }
}
