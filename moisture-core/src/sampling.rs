//! Reading shared between the sampling path and the control loop.
//!
//! The sampling path (timer tick + conversion-complete) only ever calls
//! [`SharedReading::submit`]; the control loop reads with
//! [`SharedReading::current`] and toggles noise rejection. Both sides go
//! through 16-bit atomics, so a read never observes half of a write.

use portable_atomic::{AtomicBool, AtomicU16, Ordering};

use crate::config::{DENOISE_THRESHOLD, MAX_READING};

/// Latest sensor reading plus the calibration gate for noise rejection.
pub struct SharedReading {
    value: AtomicU16,
    calibrating: AtomicBool,
}

impl SharedReading {
    /// Creates a reading at [`MAX_READING`] with noise rejection off.
    pub const fn new() -> Self {
        Self {
            value: AtomicU16::new(MAX_READING),
            calibrating: AtomicBool::new(false),
        }
    }

    /// Current reading.
    pub fn current(&self) -> u16 {
        self.value.load(Ordering::Acquire)
    }

    /// Restores the power-on state: reading at maximum, noise rejection off.
    pub fn reset(&self) {
        self.calibrating.store(false, Ordering::Release);
        self.value.store(MAX_READING, Ordering::Release);
    }

    /// Enables or disables noise rejection.
    pub fn set_calibrating(&self, calibrating: bool) {
        self.calibrating.store(calibrating, Ordering::Release);
    }

    /// True while a calibration is in progress.
    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::Acquire)
    }

    /// Publishes a completed conversion.
    ///
    /// While calibrating, samples within [`DENOISE_THRESHOLD`] of the current
    /// reading are dropped. Returns whether the reading changed.
    pub fn submit(&self, sample: u16) -> bool {
        if self.is_calibrating() && self.current().abs_diff(sample) <= DENOISE_THRESHOLD {
            return false;
        }
        // Only the sampling path stores outside of reset(), so no CAS needed.
        self.value.store(sample, Ordering::Release);
        true
    }
}

impl Default for SharedReading {
    fn default() -> Self {
        Self::new()
    }
}

/// Control over the periodic sampling path.
///
/// Implemented by the firmware on top of its timer and converter; the
/// control loop only needs to switch it on and off.
pub trait Sampler {
    /// Configures the timebase and converter and starts sampling.
    ///
    /// The first conversion is triggered immediately, then one per period.
    fn start(&mut self);

    /// Stops sampling: the timebase halts, so no further conversion is
    /// triggered. The converter is reconfigured by the next [`start`](Self::start).
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_max() {
        let reading = SharedReading::new();
        assert_eq!(reading.current(), MAX_READING);
        assert!(!reading.is_calibrating());
    }

    #[test]
    fn test_normal_mode_always_overwrites() {
        let reading = SharedReading::new();
        assert!(reading.submit(600));
        assert!(reading.submit(601));
        assert!(reading.submit(601));
        assert_eq!(reading.current(), 601);
    }

    #[test]
    fn test_calibrating_rejects_jitter() {
        let reading = SharedReading::new();
        reading.submit(400);
        reading.set_calibrating(true);

        for sample in [390, 410, 395, 405, 400, 391, 409] {
            assert!(!reading.submit(sample));
            assert_eq!(reading.current(), 400);
        }

        assert!(reading.submit(411));
        assert_eq!(reading.current(), 411);
        assert!(reading.submit(400));
        assert_eq!(reading.current(), 400);
    }

    #[test]
    fn test_reset_clears_calibration_gate() {
        let reading = SharedReading::new();
        reading.submit(200);
        reading.set_calibrating(true);
        reading.reset();

        assert_eq!(reading.current(), MAX_READING);
        assert!(!reading.is_calibrating());
        assert!(reading.submit(1020));
    }
}
