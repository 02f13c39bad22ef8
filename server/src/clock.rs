//! Monotonic session clock used to time registrations

use std::time::Instant;

/// Seconds elapsed since the server session started
///
/// Backed by [`Instant`], so wall-clock adjustments never make a registration
/// fire early or stall.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn started_at(started: Instant) -> Self {
        Self { started }
    }

    pub fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
