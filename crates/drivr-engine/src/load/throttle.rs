//! Throttle mode state machine.
//!
//! Pure and clock-driven: feed it samples with explicit timestamps.

use serde::Serialize;
use time::OffsetDateTime;

use crate::config::ThrottleConfig;
use drivr_core::to_time_duration;

/// Whether the engine is shedding load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    #[default]
    Normal,
    Throttled,
}

impl ThrottleMode {
    pub fn is_throttled(self) -> bool {
        self == Self::Throttled
    }
}

/// Rolling load counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSample {
    pub active_sessions: usize,
    /// Requests seen in the trailing window.
    pub requests_in_window: usize,
}

/// Hysteresis controller for [`ThrottleMode`].
///
/// Turns on as soon as one sample reaches a high-water mark. Turns off only
/// once every sample has stayed below both low-water marks for the cooldown.
#[derive(Debug, Clone)]
pub struct ThrottleController {
    high_sessions: usize,
    burst_requests: usize,
    low_sessions: usize,
    low_requests: usize,
    cooldown: time::Duration,
    mode: ThrottleMode,
    below_since: Option<OffsetDateTime>,
}

impl ThrottleController {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            high_sessions: config.high_sessions,
            burst_requests: config.burst_requests,
            low_sessions: config.low_sessions,
            low_requests: config.low_requests,
            cooldown: to_time_duration(config.cooldown),
            mode: ThrottleMode::Normal,
            below_since: None,
        }
    }

    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }

    /// Feed one sample and return the resulting mode.
    pub fn observe(&mut self, sample: LoadSample, now: OffsetDateTime) -> ThrottleMode {
        match self.mode {
            ThrottleMode::Normal => {
                if sample.active_sessions >= self.high_sessions
                    || sample.requests_in_window >= self.burst_requests
                {
                    self.mode = ThrottleMode::Throttled;
                    self.below_since = None;
                }
            }
            ThrottleMode::Throttled => {
                let below = sample.active_sessions < self.low_sessions
                    && sample.requests_in_window < self.low_requests;
                if !below {
                    self.below_since = None;
                } else {
                    let since = *self.below_since.get_or_insert(now);
                    if now - since >= self.cooldown {
                        self.mode = ThrottleMode::Normal;
                        self.below_since = None;
                    }
                }
            }
        }
        self.mode
    }
}
