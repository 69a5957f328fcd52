//! Firmware for a soil-moisture "needs watering" indicator.
//!
//! # Overview
//!
//! This firmware samples a resistive/capacitive soil sensor and lights an
//! indicator when the soil dries out:
//! - One ADC conversion per second, published to a shared atomic reading
//! - Hysteresis between a lower and upper threshold so the indicator never chatters
//! - In-field calibration: hold the calibration button in the current soil to
//!   make it the new dry threshold
//! - Factory reset button erasing the calibration
//! - Calibration stored in the on-chip data EEPROM, restored at boot
//!
//! # Hardware
//!
//! - **MCU**: STM32L031G6U6 (Cortex-M0+, 1 KiB data EEPROM)
//! - **Probe**: analog moisture sensor on ADC_IN5, sampled at 10 bits
//! - **Indicators**: main LED and calibration LED
//! - **Buttons**: calibration and factory reset, active low
//!
//! # Tasks
//!
//! - `main` - runs [`MoistureMonitor`]: boot sequence, button polling,
//!   hysteresis, calibration and factory reset
//! - [`sampler::sampler_task`] - periodic conversions, started and stopped
//!   by the monitor
//!
//! While the monitor waits for a button release the executor keeps running
//! the sampler, so readings stay fresh during calibration.
//!
//! # Module Organization
//!
//! - [`hardware`] - Pin mappings and peripheral initialization
//! - [`sampler`] - ADC sampling task and its control handle
//! - [`eeprom`] - Data EEPROM driver behind `embedded-storage`

#![no_std]
#![no_main]

mod eeprom;
mod hardware;
mod sampler;

use embassy_executor::Spawner;
use embassy_stm32::{
    Config,
    rcc::{MSIRange, Sysclk},
};
use embassy_time::Delay;
use moisture_core::{
    MoistureMonitor, SharedReading,
    monitor::{Buttons, Indicators},
};
use {defmt_rtt as _, panic_probe as _};

use hardware::Board;
use sampler::{SamplerHandle, sampler_task};

/// Reading shared between the sampler task and the control loop.
static READING: SharedReading = SharedReading::new();

/// Creates the clock configuration for STM32L031.
///
/// # Clock Settings
///
/// - **MSI**: 2.097 MHz system clock (divides evenly into the 32.768 kHz time base)
/// - **HSI16**: enabled for the ADC
/// - **System clock**: MSI (no PLL)
///
/// # Returns
///
/// Configured RCC settings for embassy-stm32 initialization
fn create_clock_config() -> embassy_stm32::rcc::Config {
    let mut rcc = embassy_stm32::rcc::Config::default();
    rcc.msi = Some(MSIRange::RANGE2M);
    rcc.hsi = true;
    rcc.sys = Sysclk::MSI;
    rcc
}

/// Main entry point for the moisture indicator firmware.
///
/// # Initialization Sequence
///
/// 1. Configure clocks
/// 2. Initialize STM32 peripherals and the board
/// 3. Spawn the sampler task (idle until the monitor starts it)
/// 4. Hand the remaining peripherals to the monitor and run it forever
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = Config::default();
    config.rcc = create_clock_config();

    let p = embassy_stm32::init(config);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Moisture indicator firmware starting...");

    let board = Board::new(p);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Spawning sampler task...");

    spawner
        .spawn(sampler_task(board.sensor, &READING))
        .unwrap();

    let mut monitor = MoistureMonitor::new(
        Indicators {
            main: board.main_led,
            calibration: board.calibration_led,
        },
        Buttons {
            calibrate: board.calibrate_button,
            reset: board.reset_button,
        },
        Delay,
        board.eeprom,
        SamplerHandle,
        &READING,
    );

    #[cfg(feature = "debug-mode")]
    defmt::info!("Entering control loop...");

    monitor.run().await
}
