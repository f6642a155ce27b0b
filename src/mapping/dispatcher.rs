//! Tick to action mapping

use std::fmt::{self, Display};

use tracing::debug;

use crate::input::normalizer::NormalizedTick;

/// What the actuator should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequest {
    /// Relative volume change in percent points
    VolumeDelta(i32),
    ToggleMute,
}

impl Display for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRequest::VolumeDelta(amount) => write!(f, "volume {:+}%", amount),
            ActionRequest::ToggleMute => write!(f, "toggle mute"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    multiplier: i32,
}

impl ActionDispatcher {
    pub fn new(multiplier: i32) -> Self {
        Self { multiplier }
    }

    pub fn multiplier(&self) -> i32 {
        self.multiplier
    }

    /// Scales a tick into a relative volume change; clamping is left to the actuator
    pub fn dispatch(&self, tick: &NormalizedTick) -> ActionRequest {
        let amount = tick.delta().saturating_mul(self.multiplier);
        debug!(
            "Tick {:+} x{} -> volume change {:+}",
            tick.delta(),
            self.multiplier,
            amount
        );
        ActionRequest::VolumeDelta(amount)
    }

    pub fn toggle(&self) -> ActionRequest {
        ActionRequest::ToggleMute
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new(2)
    }
}
