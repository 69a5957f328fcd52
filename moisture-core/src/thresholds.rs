//! Dry/wet threshold pair.

use crate::config::{DEFAULT_LOWER, MAX_READING, THRESHOLD_GAP};

/// Hysteresis thresholds.
///
/// The indicator turns on below `lower` and off above `upper`; readings in
/// between leave it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThresholdPair {
    pub lower: u16,
    pub upper: u16,
}

impl ThresholdPair {
    /// Thresholds of an uncalibrated device (512, 532).
    pub const DEFAULT: Self = Self::from_lower(DEFAULT_LOWER);

    /// Derives the pair from a lower threshold.
    ///
    /// `upper` is `lower + THRESHOLD_GAP`, saturating at [`MAX_READING`].
    /// A `lower` above [`MAX_READING`] is clamped so `lower <= upper` always
    /// holds.
    pub const fn from_lower(lower: u16) -> Self {
        let lower = if lower > MAX_READING { MAX_READING } else { lower };
        let upper = if lower <= MAX_READING - THRESHOLD_GAP {
            lower + THRESHOLD_GAP
        } else {
            MAX_READING
        };
        Self { lower, upper }
    }

    /// True if `reading` lies in the dead zone `[lower, upper]`.
    pub fn contains(&self, reading: u16) -> bool {
        (self.lower..=self.upper).contains(&reading)
    }
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self::DEFAULT
    }
}
