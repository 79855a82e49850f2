//! Actuator that reports the output state through tracing.

use meshlight_onoff::Actuator;
use tracing::info;

/// Stands in for the board LED.
#[derive(Debug, Default)]
pub struct LogActuator {
    on: bool,
}

impl LogActuator {
    /// Current output level.
    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl Actuator for LogActuator {
    fn set(&mut self, on: bool) {
        self.on = on;
        info!(led = if on { "on" } else { "off" }, "output");
    }
}
