//! Calibration record in non-volatile storage.
//!
//! # Layout
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 2    | calibrated value, little endian        |
//! | 2      | 1    | calibration flag, `1` when calibrated  |
//!
//! Each field is written with a single [`Storage::write`] call. Backends
//! must program such a call (at most two bytes, at an even offset for the
//! value) as one power-loss-atomic operation; with that, a power loss leaves
//! every field either old or new. Fields already holding the requested
//! bytes are not rewritten.

use embedded_storage::Storage;

use crate::thresholds::ThresholdPair;

/// Offset of the two-byte calibrated value.
pub const VALUE_OFFSET: u32 = 0;

/// Offset of the one-byte calibration flag.
pub const FLAG_OFFSET: u32 = 2;

/// Flag byte marking a calibrated device. Anything else means uncalibrated.
const CALIBRATED: u8 = 1;

/// Errors from the calibration store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError<E> {
    /// Record does not fit in the backend's capacity
    OutOfRange,
    /// Backend read or write failed
    Storage(E),
}

/// Persisted calibration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    pub is_calibrated: bool,
    pub calibrated_value: u16,
}

impl CalibrationRecord {
    /// Record of a factory-fresh or reset device.
    pub const CLEARED: Self = Self {
        is_calibrated: false,
        calibrated_value: 0,
    };

    /// Thresholds this record seeds at boot.
    pub fn thresholds(&self) -> ThresholdPair {
        if self.is_calibrated {
            ThresholdPair::from_lower(self.calibrated_value)
        } else {
            ThresholdPair::DEFAULT
        }
    }
}

/// Calibration record accessor over a byte-addressed storage backend.
pub struct CalibrationStore<S> {
    storage: S,
}

impl<S: Storage> CalibrationStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Reads the persisted calibration.
    pub fn read_calibration(&mut self) -> Result<CalibrationRecord, StoreError<S::Error>> {
        self.check_capacity()?;

        let mut value = [0u8; 2];
        let mut flag = [0u8; 1];
        self.storage
            .read(VALUE_OFFSET, &mut value)
            .map_err(StoreError::Storage)?;
        self.storage
            .read(FLAG_OFFSET, &mut flag)
            .map_err(StoreError::Storage)?;

        Ok(CalibrationRecord {
            is_calibrated: flag[0] == CALIBRATED,
            calibrated_value: u16::from_le_bytes(value),
        })
    }

    /// Persists a calibration.
    ///
    /// Setting a calibration writes the value before the flag, clearing one
    /// drops the flag before the value, so an interrupted write never marks
    /// a stale value as calibrated.
    pub fn write_calibration(
        &mut self,
        is_calibrated: bool,
        value: u16,
    ) -> Result<(), StoreError<S::Error>> {
        self.check_capacity()?;

        let flag = [if is_calibrated { CALIBRATED } else { 0 }];
        let value = value.to_le_bytes();
        if is_calibrated {
            self.update(VALUE_OFFSET, &value)?;
            self.update(FLAG_OFFSET, &flag)
        } else {
            self.update(FLAG_OFFSET, &flag)?;
            self.update(VALUE_OFFSET, &value)
        }
    }

    /// Erases the calibration, leaving [`CalibrationRecord::CLEARED`].
    pub fn clear(&mut self) -> Result<(), StoreError<S::Error>> {
        self.write_calibration(false, 0)
    }

    fn check_capacity(&self) -> Result<(), StoreError<S::Error>> {
        if self.storage.capacity() < (FLAG_OFFSET as usize + 1) {
            return Err(StoreError::OutOfRange);
        }
        Ok(())
    }

    /// Writes `bytes` unless the backend already holds them.
    fn update<const N: usize>(
        &mut self,
        offset: u32,
        bytes: &[u8; N],
    ) -> Result<(), StoreError<S::Error>> {
        let mut current = [0u8; N];
        self.storage
            .read(offset, &mut current)
            .map_err(StoreError::Storage)?;
        if &current == bytes {
            return Ok(());
        }
        self.storage.write(offset, bytes).map_err(StoreError::Storage)
    }
}
