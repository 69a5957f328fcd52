//! Data EEPROM driver for STM32L0.
//!
//! The STM32L031 carries 1 KiB of data EEPROM mapped at `0x0808_0000`.
//! Reads are plain memory loads; writes need the PECR unlock sequence. The
//! hardware erases before programming and each byte or aligned half-word
//! lands completely or not at all. Aligned byte pairs are programmed as
//! half-words, so every [`Storage::write`] of up to two bytes at an even
//! offset is atomic with respect to power loss.
//!
//! Exposed through `embedded-storage` so the calibration store stays board
//! agnostic.

use embassy_stm32::{Peri, pac, peripherals::FLASH};
use embedded_storage::{ReadStorage, Storage};

/// Start of the data EEPROM in the memory map
const EEPROM_BASE: usize = 0x0808_0000;

/// Data EEPROM size on STM32L031
const EEPROM_SIZE: usize = 1024;

/// PEKEYR unlock sequence
const PEKEY1: u32 = 0x89AB_CDEF;
const PEKEY2: u32 = 0x0203_0405;

/// Errors from data EEPROM access
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum EepromError {
    /// Access extends past the end of the EEPROM
    OutOfBounds,
    /// Programming reported a write-protection, alignment or size error
    Program,
}

/// Byte-addressed data EEPROM.
///
/// Holds the flash peripheral singleton so nothing else can reprogram the
/// memory interface behind its back.
pub struct DataEeprom {
    _flash: Peri<'static, FLASH>,
}

impl DataEeprom {
    /// Creates the driver.
    ///
    /// # Arguments
    ///
    /// * `flash` - FLASH peripheral singleton (PECR/PEKEYR/SR live there)
    pub fn new(flash: Peri<'static, FLASH>) -> Self {
        Self { _flash: flash }
    }

    fn check_range(offset: u32, len: usize) -> Result<usize, EepromError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= EEPROM_SIZE => Ok(start),
            _ => Err(EepromError::OutOfBounds),
        }
    }

    /// Unlocks PECR for data EEPROM programming.
    fn unlock() {
        if pac::FLASH.pecr().read().pelock() {
            pac::FLASH.pekeyr().write_value(PEKEY1);
            pac::FLASH.pekeyr().write_value(PEKEY2);
        }
    }

    fn lock() {
        pac::FLASH.pecr().modify(|w| w.set_pelock(true));
    }

    /// Programs `bytes` starting at `addr`.
    ///
    /// Pairs of bytes at even addresses go out as one half-word, which the
    /// data EEPROM programs in a single operation. A two-byte field at an
    /// even offset therefore never ends up half written.
    fn program(addr: usize, bytes: &[u8]) -> Result<(), EepromError> {
        let mut i = 0;
        while i < bytes.len() {
            let target = addr + i;
            if target % 2 == 0 && i + 1 < bytes.len() {
                let half = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
                // SAFETY: caller range-checked `addr..addr + bytes.len()`, the
                // address is half-word aligned and PECR is unlocked.
                unsafe { core::ptr::write_volatile(target as *mut u16, half) };
                i += 2;
            } else {
                // SAFETY: as above, byte access has no alignment requirement.
                unsafe { core::ptr::write_volatile(target as *mut u8, bytes[i]) };
                i += 1;
            }
            Self::wait_ready()?;
        }
        Ok(())
    }

    /// Waits for the current operation and collects its error flags.
    fn wait_ready() -> Result<(), EepromError> {
        while pac::FLASH.sr().read().bsy() {}

        let sr = pac::FLASH.sr().read();
        if sr.wrperr() || sr.pgaerr() || sr.sizerr() {
            // Flags are write-one-to-clear
            pac::FLASH.sr().modify(|w| {
                w.set_wrperr(true);
                w.set_pgaerr(true);
                w.set_sizerr(true);
            });
            return Err(EepromError::Program);
        }
        Ok(())
    }
}

impl ReadStorage for DataEeprom {
    type Error = EepromError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = Self::check_range(offset, bytes.len())?;

        for (i, byte) in bytes.iter_mut().enumerate() {
            // SAFETY: the range check keeps the address inside the data EEPROM.
            *byte = unsafe { core::ptr::read_volatile((EEPROM_BASE + start + i) as *const u8) };
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        EEPROM_SIZE
    }
}

impl Storage for DataEeprom {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = Self::check_range(offset, bytes.len())?;

        Self::unlock();
        let result = Self::program(EEPROM_BASE + start, bytes);
        Self::lock();

        if let Err(_e) = result {
            #[cfg(feature = "debug-mode")]
            defmt::warn!("EEPROM write at {} failed: {}", offset, _e);
        }

        result
    }
}
