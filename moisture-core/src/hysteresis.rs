//! Two-state indicator controller with a dead zone.
//!
//! The indicator only switches on when the reading drops strictly below the
//! lower threshold, and only switches off once it rises strictly above the
//! upper one. A reading oscillating around a single threshold therefore
//! never makes the output chatter.

use crate::thresholds::ThresholdPair;

/// Hysteresis state machine driving the "needs watering" indicator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hysteresis {
    is_flashing: bool,
}

impl Hysteresis {
    /// Creates the controller with the indicator off.
    pub const fn new() -> Self {
        Self { is_flashing: false }
    }

    /// Whether the indicator is currently asserted.
    pub fn is_flashing(&self) -> bool {
        self.is_flashing
    }

    /// Forces the indicator state off, e.g. while calibrating.
    pub fn force_off(&mut self) {
        self.is_flashing = false;
    }

    /// Evaluates one reading.
    ///
    /// Returns `Some(new_state)` when the indicator must change, `None`
    /// otherwise.
    pub fn update(&mut self, reading: u16, thresholds: &ThresholdPair) -> Option<bool> {
        if thresholds.contains(reading) {
            return None;
        }
        if reading < thresholds.lower && !self.is_flashing {
            self.is_flashing = true;
            return Some(true);
        }
        if reading > thresholds.upper && self.is_flashing {
            self.is_flashing = false;
            return Some(false);
        }
        None
    }
}
