//! Board-agnostic control logic for the soil-moisture indicator.
//!
//! Everything that decides *what* the indicator does lives here, generic over
//! `embedded-hal` pins and delays and `embedded-storage` backends:
//!
//! - [`sampling`] - Reading shared between the sampling path and the control loop
//! - [`thresholds`] - Dry/wet threshold pair and its derivation
//! - [`hysteresis`] - Two-state indicator controller with dead zone
//! - [`persistence`] - Calibration record in non-volatile storage
//! - [`monitor`] - Bootstrap, main loop, calibration and factory reset
//! - [`config`] - Compile-time constants

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod hysteresis;
pub mod monitor;
pub mod persistence;
pub mod sampling;
pub mod thresholds;

pub use monitor::MoistureMonitor;
pub use persistence::{CalibrationRecord, CalibrationStore, StoreError};
pub use sampling::{Sampler, SharedReading};
pub use thresholds::ThresholdPair;
