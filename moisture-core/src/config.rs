//! Compile-time constants for the indicator.
//!
//! Readings are raw converter counts at 10-bit resolution.

/// Largest reading the converter can produce.
pub const MAX_READING: u16 = 1023;

/// Distance between the lower and upper threshold.
pub const THRESHOLD_GAP: u16 = 20;

/// Jitter band ignored while calibrating.
///
/// Also added to the captured baseline so the dry threshold sits just above
/// the noise floor.
pub const DENOISE_THRESHOLD: u16 = 10;

/// Lower threshold used until the device is calibrated.
pub const DEFAULT_LOWER: u16 = 512;

/// Short pause: calibration settle time and startup blink phase.
pub const SHORT_DELAY_MS: u32 = 100;

/// Long pause: confirmation hold after calibration/reset and startup settle.
pub const DEFAULT_DELAY_MS: u32 = 500;

/// Number of main-indicator blinks at startup.
pub const STARTUP_BLINKS: u8 = 3;

/// Main loop period.
///
/// The loop yields for this long between iterations so the sampling task
/// gets to run on a cooperative executor.
pub const POLL_INTERVAL_MS: u32 = 10;
