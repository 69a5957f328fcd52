//! Periodic moisture sampling.
//!
//! A ticker started by the control loop triggers one ADC conversion per
//! [`SAMPLE_PERIOD_MS`]. The conversion-complete interrupt wakes the
//! sampler task, which publishes the result to the shared reading. Noise
//! rejection during calibration is applied by
//! [`SharedReading::submit`].
//!
//! The control loop talks to the task through [`SamplerHandle`]: `start`
//! (re)configures the converter and converts immediately, `stop` parks the
//! task with the timebase dropped until the next `start`.

use embassy_futures::select::{Either, select};
use embassy_stm32::adc::{Adc, AnyAdcChannel, Resolution, SampleTime};
use embassy_stm32::peripherals::ADC1;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Ticker};
use moisture_core::{Sampler, SharedReading};

/// Time between two conversions.
pub const SAMPLE_PERIOD_MS: u64 = 1000;

/// Commands from the control loop to the sampler task
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
enum SamplerCommand {
    /// Configure the converter, convert now, then once per period
    Start,
    /// Drop the timebase and wait for the next `Start`
    Stop,
}

/// Latest command for the sampler task; a newer command replaces an
/// unread one.
static SAMPLER_COMMAND: Signal<CriticalSectionRawMutex, SamplerCommand> = Signal::new();

/// Soil-moisture sensor on one ADC channel.
pub struct MoistureSensor {
    /// ADC driver (conversion-complete interrupt bound)
    adc: Adc<'static, ADC1>,
    /// Probe input channel
    channel: AnyAdcChannel<ADC1>,
}

impl MoistureSensor {
    /// Creates a sensor on the given converter and channel.
    ///
    /// # Arguments
    ///
    /// * `adc` - ADC driver with its interrupt bound
    /// * `channel` - Analog channel the sensor is wired to
    pub fn new(adc: Adc<'static, ADC1>, channel: AnyAdcChannel<ADC1>) -> Self {
        Self { adc, channel }
    }

    /// Applies the converter settings: 10-bit resolution (0..=1023) and a
    /// long sample time for the sensor's high source impedance.
    fn configure(&mut self) {
        self.adc.set_resolution(Resolution::BITS10);
        self.adc.set_sample_time(SampleTime::CYCLES79_5);
    }

    /// Runs one conversion and waits for its completion interrupt.
    async fn convert(&mut self) -> u16 {
        self.adc.read(&mut self.channel).await
    }
}

/// [`Sampler`] implementation forwarding to the sampler task.
pub struct SamplerHandle;

impl Sampler for SamplerHandle {
    fn start(&mut self) {
        SAMPLER_COMMAND.signal(SamplerCommand::Start);
    }

    fn stop(&mut self) {
        SAMPLER_COMMAND.signal(SamplerCommand::Stop);
    }
}

/// Async task converting the sensor once per sample period.
///
/// Idles until [`SamplerHandle::start`] is called. Runs for the lifetime of
/// the firmware.
///
/// # Arguments
///
/// * `sensor` - Probe to sample (takes ownership)
/// * `reading` - Shared reading updated after each conversion
#[embassy_executor::task]
pub async fn sampler_task(mut sensor: MoistureSensor, reading: &'static SharedReading) {
    loop {
        while SAMPLER_COMMAND.wait().await != SamplerCommand::Start {}

        #[cfg(feature = "debug-mode")]
        defmt::info!("Sampling started");

        sensor.configure();
        let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_PERIOD_MS));

        loop {
            let sample = sensor.convert().await;

            // A command raised mid-conversion supersedes its result.
            if !SAMPLER_COMMAND.signaled() {
                reading.submit(sample);

                #[cfg(feature = "debug-mode")]
                defmt::debug!("Sample {} -> reading {}", sample, reading.current());
            }

            match select(ticker.next(), SAMPLER_COMMAND.wait()).await {
                Either::First(()) => {}
                Either::Second(SamplerCommand::Start) => {
                    sensor.configure();
                    ticker.reset();
                }
                Either::Second(SamplerCommand::Stop) => break,
            }
        }

        #[cfg(feature = "debug-mode")]
        defmt::info!("Sampling stopped");
    }
}
