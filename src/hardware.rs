//! Hardware abstraction and peripheral initialization.
//!
//! This module defines the pin mappings and peripheral initialization
//! for the soil-moisture indicator board.
//!
//! # Pin Assignments
//!
//! ## Indicators (active high)
//! - **PB0**: MAIN_LED - "Needs watering" indicator
//! - **PB1**: CAL_LED - Calibration / factory reset indicator
//!
//! ## Buttons (active low, internal pull-up)
//! - **PA7**: CAL_BTN - Starts a calibration
//! - **PA6**: RESET_BTN - Restores factory defaults
//!
//! ## Sensor
//! - **PA5**: ADC_IN5 - Soil-moisture sensor output
//!
//! ## Storage
//! - Data EEPROM (on-chip, 1 KiB) - Calibration record
//!
//! ## Debug (SWD)
//! - **PA13**: SWDIO
//! - **PA14**: SWCLK

use embassy_stm32::{
    adc::{self, Adc, AdcChannel},
    bind_interrupts,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    peripherals::ADC1,
};

use crate::eeprom::DataEeprom;
use crate::sampler::MoistureSensor;

bind_interrupts!(struct Irqs {
    ADC1_COMP => adc::InterruptHandler<ADC1>;
});

/// Top-level peripheral container for the moisture indicator.
///
/// Owns every pin and peripheral the firmware uses, configured and ready
/// to hand to the control loop and the sampler task.
pub struct Board {
    /// "Needs watering" indicator (PB0)
    pub main_led: Output<'static>,
    /// Calibration indicator (PB1)
    pub calibration_led: Output<'static>,
    /// Calibration button (PA7)
    pub calibrate_button: ExtiInput<'static>,
    /// Factory reset button (PA6)
    pub reset_button: ExtiInput<'static>,
    /// Moisture sensor on ADC_IN5
    pub sensor: MoistureSensor,
    /// On-chip data EEPROM
    pub eeprom: DataEeprom,
}

impl Board {
    /// Initializes all peripherals from STM32 peripheral singleton.
    ///
    /// # Initial GPIO States
    ///
    /// - PB0 (MAIN_LED): Low (off)
    /// - PB1 (CAL_LED): Low (off)
    /// - PA7 (CAL_BTN): Input, pull-up
    /// - PA6 (RESET_BTN): Input, pull-up
    ///
    /// # Arguments
    ///
    /// * `p` - STM32 peripheral singleton from embassy_stm32::init()
    pub fn new(p: embassy_stm32::Peripherals) -> Self {
        Self {
            main_led: Output::new(p.PB0, Level::Low, Speed::Low),
            calibration_led: Output::new(p.PB1, Level::Low, Speed::Low),
            calibrate_button: ExtiInput::new(p.PA7, p.EXTI7, Pull::Up),
            reset_button: ExtiInput::new(p.PA6, p.EXTI6, Pull::Up),
            sensor: MoistureSensor::new(Adc::new(p.ADC1, Irqs), p.PA5.degrade_adc()),
            eeprom: DataEeprom::new(p.FLASH),
        }
    }
}
