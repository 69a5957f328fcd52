//! Control loop of the moisture indicator.
//!
//! [`MoistureMonitor`] owns every piece of control state (thresholds,
//! indicator state, calibration store) and runs the main polling loop:
//!
//! ```text
//! initialize ──► poll ──► poll ──► ...
//!                 │
//!                 ├─ calibration button low ─► calibrate
//!                 ├─ hysteresis update
//!                 └─ reset button low ───────► factory_reset ─► initialize
//! ```
//!
//! Cold boot and factory reset share [`MoistureMonitor::initialize`]; the
//! reset path returns to the loop instead of re-entering it.
//!
//! Waits are `async`: while a procedure is parked on a delay or on a button
//! release, the executor keeps servicing the sampling path.

use core::convert::Infallible;

use embedded_hal::digital::{InputPin, OutputPin, PinState};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_storage::Storage;

use crate::config::{
    DEFAULT_DELAY_MS, DENOISE_THRESHOLD, MAX_READING, POLL_INTERVAL_MS, SHORT_DELAY_MS,
    STARTUP_BLINKS,
};
use crate::hysteresis::Hysteresis;
use crate::persistence::CalibrationStore;
use crate::sampling::{Sampler, SharedReading};
use crate::thresholds::ThresholdPair;

/// Indicator outputs (active high).
pub struct Indicators<L> {
    /// "Needs watering" indicator
    pub main: L,
    /// Lit while calibrating or resetting
    pub calibration: L,
}

/// Push buttons (active low, pulled up).
pub struct Buttons<B> {
    /// Starts a calibration
    pub calibrate: B,
    /// Restores factory defaults
    pub reset: B,
}

/// Soil-moisture indicator control loop.
pub struct MoistureMonitor<'a, L, B, D, S, P> {
    indicators: Indicators<L>,
    buttons: Buttons<B>,
    delay: D,
    store: CalibrationStore<S>,
    sampler: P,
    reading: &'a SharedReading,
    thresholds: ThresholdPair,
    hysteresis: Hysteresis,
}

impl<'a, L, B, D, S, P> MoistureMonitor<'a, L, B, D, S, P>
where
    L: OutputPin<Error = Infallible>,
    B: InputPin<Error = Infallible> + Wait,
    D: DelayNs,
    S: Storage,
    P: Sampler,
{
    /// Creates a monitor in the pre-boot state.
    ///
    /// Nothing touches the hardware until [`initialize`](Self::initialize)
    /// or [`run`](Self::run) is called.
    ///
    /// # Arguments
    ///
    /// * `indicators` - Main and calibration indicator outputs
    /// * `buttons` - Calibration and factory-reset inputs
    /// * `delay` - Async delay provider
    /// * `storage` - Non-volatile backend holding the calibration record
    /// * `sampler` - Switch for the periodic sampling path
    /// * `reading` - Reading published by the sampling path
    pub fn new(
        indicators: Indicators<L>,
        buttons: Buttons<B>,
        delay: D,
        storage: S,
        sampler: P,
        reading: &'a SharedReading,
    ) -> Self {
        Self {
            indicators,
            buttons,
            delay,
            store: CalibrationStore::new(storage),
            sampler,
            reading,
            thresholds: ThresholdPair::DEFAULT,
            hysteresis: Hysteresis::new(),
        }
    }

    /// Thresholds currently in force.
    pub fn thresholds(&self) -> ThresholdPair {
        self.thresholds
    }

    /// Whether the "needs watering" indicator is asserted.
    pub fn is_flashing(&self) -> bool {
        self.hysteresis.is_flashing()
    }

    /// Boots the system, then runs the main loop forever.
    pub async fn run(&mut self) -> ! {
        self.initialize().await;

        loop {
            self.poll().await;
            self.delay.delay_ms(POLL_INTERVAL_MS).await;
        }
    }

    /// Brings the system to its power-on state.
    ///
    /// # Sequence
    ///
    /// 1. Reset control state: indicator off, noise rejection off, reading at maximum
    /// 2. Seed thresholds from the persisted calibration, or the defaults
    /// 3. Drive both indicators off
    /// 4. Blink the main indicator [`STARTUP_BLINKS`] times
    /// 5. Settle for [`DEFAULT_DELAY_MS`]
    /// 6. Start sampling, which triggers the first conversion
    pub async fn initialize(&mut self) {
        self.hysteresis = Hysteresis::new();
        self.reading.reset();

        self.thresholds = match self.store.read_calibration() {
            Ok(record) => record.thresholds(),
            Err(_) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("Calibration unreadable, using defaults");

                ThresholdPair::DEFAULT
            }
        };

        #[cfg(feature = "defmt")]
        defmt::info!("Thresholds: {}", self.thresholds);

        drive(&mut self.indicators.main, false);
        drive(&mut self.indicators.calibration, false);

        for _ in 0..STARTUP_BLINKS {
            self.delay.delay_ms(SHORT_DELAY_MS).await;
            drive(&mut self.indicators.main, true);
            self.delay.delay_ms(SHORT_DELAY_MS).await;
            drive(&mut self.indicators.main, false);
            self.delay.delay_ms(SHORT_DELAY_MS).await;
        }

        self.delay.delay_ms(DEFAULT_DELAY_MS).await;

        self.sampler.start();
    }

    /// Runs one iteration of the main loop.
    ///
    /// Checks the calibration button, updates the indicator, then checks the
    /// reset button. A pressed button runs its procedure to completion
    /// before the iteration continues.
    pub async fn poll(&mut self) {
        if is_pressed(&mut self.buttons.calibrate) {
            self.calibrate().await;
        }

        self.update_indicator();

        if is_pressed(&mut self.buttons.reset) {
            self.factory_reset().await;
        }
    }

    /// Applies the hysteresis rules to the current reading.
    pub fn update_indicator(&mut self) {
        let reading = self.reading.current();
        if let Some(on) = self.hysteresis.update(reading, &self.thresholds) {
            drive(&mut self.indicators.main, on);

            #[cfg(feature = "defmt")]
            defmt::info!("Reading {} -> indicator {}", reading, on);
        }
    }

    /// Captures the current reading as the new dry baseline.
    ///
    /// Noise rejection is active for the whole procedure. The captured value
    /// is persisted before waiting for the calibration button to be released;
    /// the new thresholds take effect after the release.
    ///
    /// Returns the thresholds now in force.
    pub async fn calibrate(&mut self) -> ThresholdPair {
        drive(&mut self.indicators.calibration, true);
        self.reading.set_calibrating(true);

        self.hysteresis.force_off();
        drive(&mut self.indicators.main, false);

        self.delay.delay_ms(SHORT_DELAY_MS).await;
        let calibrated_value = self
            .reading
            .current()
            .saturating_add(DENOISE_THRESHOLD)
            .min(MAX_READING);

        #[cfg(feature = "defmt")]
        defmt::info!("Calibrated value: {}", calibrated_value);

        if self.store.write_calibration(true, calibrated_value).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("Failed to persist calibration");
        }

        wait_for_release(&mut self.buttons.calibrate).await;

        self.thresholds = ThresholdPair::from_lower(calibrated_value);

        self.delay.delay_ms(DEFAULT_DELAY_MS).await;
        drive(&mut self.indicators.calibration, false);

        self.reading.set_calibrating(false);

        self.thresholds
    }

    /// Erases the calibration and reboots into defaults.
    ///
    /// Both indicators stay lit until the reset button is released and a
    /// confirmation delay has passed. Sampling is stopped and the system goes
    /// through [`initialize`](Self::initialize) exactly like a cold boot.
    pub async fn factory_reset(&mut self) {
        drive(&mut self.indicators.main, true);
        drive(&mut self.indicators.calibration, true);

        if self.store.clear().is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("Failed to erase calibration");
        }

        #[cfg(feature = "defmt")]
        defmt::info!("Factory reset");

        wait_for_release(&mut self.buttons.reset).await;

        self.delay.delay_ms(DEFAULT_DELAY_MS).await;
        drive(&mut self.indicators.main, false);
        drive(&mut self.indicators.calibration, false);

        self.sampler.stop();

        self.initialize().await;
    }
}

fn drive<L: OutputPin<Error = Infallible>>(pin: &mut L, on: bool) {
    pin.set_state(PinState::from(on))
        .unwrap_or_else(|never| match never {});
}

fn is_pressed<B: InputPin<Error = Infallible>>(button: &mut B) -> bool {
    button.is_low().unwrap_or_else(|never| match never {})
}

async fn wait_for_release<B: Wait<Error = Infallible>>(button: &mut B) {
    button
        .wait_for_high()
        .await
        .unwrap_or_else(|never| match never {});
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::CalibrationRecord;
    use crate::persistence::tests::{FaultyStorage, MemStorage};
    use embassy_futures::block_on;
    use embedded_hal::digital::ErrorType;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Output pin recording every level it is driven to.
    #[derive(Clone, Default)]
    struct MockLed {
        history: Rc<RefCell<Vec<bool>>>,
    }

    impl MockLed {
        fn is_on(&self) -> bool {
            self.history.borrow().last().copied().unwrap_or(false)
        }

        fn times_lit(&self) -> usize {
            self.history.borrow().iter().filter(|on| **on).count()
        }
    }

    impl ErrorType for MockLed {
        type Error = Infallible;
    }

    impl OutputPin for MockLed {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.history.borrow_mut().push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.history.borrow_mut().push(true);
            Ok(())
        }
    }

    /// Button that the operator releases as soon as firmware waits for it.
    #[derive(Clone, Default)]
    struct MockButton {
        pressed: Rc<Cell<bool>>,
        releases_awaited: Rc<Cell<usize>>,
    }

    impl MockButton {
        fn press(&self) {
            self.pressed.set(true);
        }
    }

    impl ErrorType for MockButton {
        type Error = Infallible;
    }

    impl InputPin for MockButton {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.pressed.get())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(self.pressed.get())
        }
    }

    impl Wait for MockButton {
        async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
            self.releases_awaited.set(self.releases_awaited.get() + 1);
            self.pressed.set(false);
            Ok(())
        }

        async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
            self.pressed.set(true);
            Ok(())
        }

        async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
            self.wait_for_high().await
        }

        async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
            self.wait_for_low().await
        }

        async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
            self.pressed.set(!self.pressed.get());
            Ok(())
        }
    }

    type DelayHook = Box<dyn FnMut(u32)>;

    /// Delay that returns immediately, logging each wait in milliseconds.
    ///
    /// The optional hook runs on every wait and stands in for the sampling
    /// path delivering conversions in the background.
    #[derive(Clone, Default)]
    struct MockDelay {
        waits_ms: Rc<RefCell<Vec<u32>>>,
        hook: Rc<RefCell<Option<DelayHook>>>,
    }

    impl MockDelay {
        fn on_wait(&self, hook: impl FnMut(u32) + 'static) {
            *self.hook.borrow_mut() = Some(Box::new(hook));
        }

        fn total_ms(&self) -> u32 {
            self.waits_ms.borrow().iter().sum()
        }

        fn record(&mut self, ms: u32) {
            self.waits_ms.borrow_mut().push(ms);
            if let Some(hook) = self.hook.borrow_mut().as_mut() {
                hook(ms);
            }
        }
    }

    impl DelayNs for MockDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.record(ns / 1_000_000);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.record(ms);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SamplerEvent {
        Start,
        Stop,
    }

    #[derive(Clone, Default)]
    struct MockSampler {
        events: Rc<RefCell<Vec<SamplerEvent>>>,
    }

    impl Sampler for MockSampler {
        fn start(&mut self) {
            self.events.borrow_mut().push(SamplerEvent::Start);
        }

        fn stop(&mut self) {
            self.events.borrow_mut().push(SamplerEvent::Stop);
        }
    }

    struct Rig {
        main_led: MockLed,
        calibration_led: MockLed,
        calibrate_button: MockButton,
        reset_button: MockButton,
        delay: MockDelay,
        storage: MemStorage,
        sampler: MockSampler,
        reading: &'static SharedReading,
    }

    type TestMonitor = MoistureMonitor<'static, MockLed, MockButton, MockDelay, MemStorage, MockSampler>;

    impl Rig {
        fn new() -> Self {
            Self {
                main_led: MockLed::default(),
                calibration_led: MockLed::default(),
                calibrate_button: MockButton::default(),
                reset_button: MockButton::default(),
                delay: MockDelay::default(),
                storage: MemStorage::default(),
                sampler: MockSampler::default(),
                reading: Box::leak(Box::new(SharedReading::new())),
            }
        }

        fn with_calibration(self, value: u16) -> Self {
            let [lo, hi] = value.to_le_bytes();
            *self.storage.bytes.borrow_mut() = [lo, hi, 1, 0];
            self
        }

        fn monitor(&self) -> TestMonitor {
            self.monitor_on(self.storage.clone())
        }

        /// Monitor wired to the rig's mocks but a different storage backend.
        fn monitor_on<S: Storage>(
            &self,
            storage: S,
        ) -> MoistureMonitor<'static, MockLed, MockButton, MockDelay, S, MockSampler> {
            MoistureMonitor::new(
                Indicators {
                    main: self.main_led.clone(),
                    calibration: self.calibration_led.clone(),
                },
                Buttons {
                    calibrate: self.calibrate_button.clone(),
                    reset: self.reset_button.clone(),
                },
                self.delay.clone(),
                storage,
                self.sampler.clone(),
                self.reading,
            )
        }

        fn booted(&self) -> TestMonitor {
            let mut monitor = self.monitor();
            block_on(monitor.initialize());
            monitor
        }

        fn booted_on_faulty_storage(
            &self,
        ) -> MoistureMonitor<'static, MockLed, MockButton, MockDelay, FaultyStorage, MockSampler>
        {
            let mut monitor = self.monitor_on(FaultyStorage { capacity: 16 });
            block_on(monitor.initialize());
            monitor
        }

        fn persisted(&self) -> CalibrationRecord {
            CalibrationStore::new(self.storage.clone())
                .read_calibration()
                .unwrap()
        }

        fn feed(&self, monitor: &mut TestMonitor, reading: u16) -> bool {
            self.reading.submit(reading);
            block_on(monitor.poll());
            monitor.is_flashing()
        }
    }

    #[test]
    fn test_cold_boot_without_calibration() {
        let rig = Rig::new();
        let monitor = rig.booted();

        assert_eq!(monitor.thresholds(), ThresholdPair { lower: 512, upper: 532 });
        assert!(!monitor.is_flashing());
        assert_eq!(rig.reading.current(), MAX_READING);
        assert!(!rig.reading.is_calibrating());

        assert_eq!(rig.main_led.times_lit(), 3);
        assert!(!rig.main_led.is_on());
        assert!(!rig.calibration_led.is_on());
        assert_eq!(rig.delay.total_ms(), 3 * 3 * 100 + 500);
        assert_eq!(*rig.sampler.events.borrow(), [SamplerEvent::Start]);
    }

    #[test]
    fn test_cold_boot_with_persisted_calibration() {
        let rig = Rig::new().with_calibration(200);
        let monitor = rig.booted();

        assert_eq!(monitor.thresholds(), ThresholdPair { lower: 200, upper: 220 });
    }

    #[test]
    fn test_indicator_follows_hysteresis() {
        let rig = Rig::new();
        let mut monitor = rig.booted();

        for reading in [600, 600, 600] {
            assert!(!rig.feed(&mut monitor, reading));
        }
        assert!(rig.feed(&mut monitor, 500));
        assert!(rig.main_led.is_on());
        assert!(rig.feed(&mut monitor, 520));
        assert!(rig.feed(&mut monitor, 532));
        assert!(!rig.feed(&mut monitor, 533));
        assert!(!rig.main_led.is_on());
    }

    #[test]
    fn test_initial_reading_keeps_indicator_off() {
        let rig = Rig::new();
        let mut monitor = rig.booted();

        block_on(monitor.poll());
        assert!(!monitor.is_flashing());
        assert_eq!(rig.main_led.times_lit(), 3);
    }

    #[test]
    fn test_calibration_from_settled_reading() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(400);
        rig.calibrate_button.press();

        let thresholds = block_on(monitor.calibrate());

        assert_eq!(thresholds, ThresholdPair { lower: 410, upper: 430 });
        assert_eq!(monitor.thresholds(), thresholds);
        assert_eq!(
            rig.persisted(),
            CalibrationRecord { is_calibrated: true, calibrated_value: 410 }
        );
        assert_eq!(rig.calibrate_button.releases_awaited.get(), 1);
        assert_eq!(*rig.calibration_led.history.borrow(), [false, true, false]);
        assert!(!rig.reading.is_calibrating());
    }

    #[test]
    fn test_calibration_suspends_indicator() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        assert!(rig.feed(&mut monitor, 100));

        rig.reading.submit(800);
        block_on(monitor.calibrate());

        assert!(!monitor.is_flashing());
        assert!(!rig.main_led.is_on());
    }

    #[test]
    fn test_calibration_rejects_jitter_while_settling() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(400);

        let reading = rig.reading;
        let mut jitter = [395, 409, 391, 404].into_iter();
        rig.delay.on_wait(move |_| {
            if let Some(sample) = jitter.next() {
                assert!(reading.is_calibrating());
                assert!(!reading.submit(sample));
            }
        });

        let thresholds = block_on(monitor.calibrate());
        assert_eq!(thresholds.lower, 410);
    }

    #[test]
    fn test_calibration_tracks_large_change_while_settling() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(400);

        let reading = rig.reading;
        let mut delivered = false;
        rig.delay.on_wait(move |ms| {
            if ms == SHORT_DELAY_MS && !delivered {
                delivered = true;
                assert!(reading.submit(450));
            }
        });

        let thresholds = block_on(monitor.calibrate());
        assert_eq!(thresholds, ThresholdPair { lower: 460, upper: 480 });
    }

    #[test]
    fn test_calibration_saturates_near_max() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(1020);

        let thresholds = block_on(monitor.calibrate());

        assert_eq!(thresholds, ThresholdPair { lower: 1023, upper: 1023 });
        assert_eq!(rig.persisted().calibrated_value, 1023);
    }

    #[test]
    fn test_calibration_survives_reboot() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(300);
        block_on(monitor.calibrate());

        let rebooted = rig.booted();
        assert_eq!(rebooted.thresholds(), ThresholdPair { lower: 310, upper: 330 });
    }

    #[test]
    fn test_poll_runs_calibration_then_hysteresis() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(400);
        rig.calibrate_button.press();

        block_on(monitor.poll());

        assert_eq!(monitor.thresholds().lower, 410);
        // 400 is below the new lower threshold
        assert!(monitor.is_flashing());
        assert!(!rig.calibration_led.is_on());
    }

    #[test]
    fn test_factory_reset_restores_defaults() {
        let rig = Rig::new().with_calibration(250);
        let mut monitor = rig.booted();
        assert_eq!(monitor.thresholds().lower, 250);
        assert!(rig.feed(&mut monitor, 100));

        let main_lit = rig.main_led.times_lit();
        rig.reset_button.press();
        block_on(monitor.poll());

        assert_eq!(rig.persisted(), CalibrationRecord::CLEARED);
        assert_eq!(monitor.thresholds(), ThresholdPair::DEFAULT);
        assert!(!monitor.is_flashing());
        assert_eq!(rig.reading.current(), MAX_READING);
        assert_eq!(rig.reset_button.releases_awaited.get(), 1);

        // Confirmation plus three startup blinks
        assert_eq!(rig.main_led.times_lit(), main_lit + 1 + 3);
        assert_eq!(rig.calibration_led.times_lit(), 1);
        assert!(!rig.main_led.is_on());
        assert!(!rig.calibration_led.is_on());
        assert_eq!(
            *rig.sampler.events.borrow(),
            [SamplerEvent::Start, SamplerEvent::Stop, SamplerEvent::Start]
        );
    }

    #[test]
    fn test_factory_reset_matches_cold_boot() {
        let rig = Rig::new();
        let mut monitor = rig.booted();
        rig.reading.submit(350);
        block_on(monitor.calibrate());
        rig.reset_button.press();
        block_on(monitor.factory_reset());

        let fresh = Rig::new().booted();
        assert_eq!(monitor.thresholds(), fresh.thresholds());
        assert_eq!(monitor.is_flashing(), fresh.is_flashing());
    }

    #[test]
    fn test_unreadable_storage_boots_with_defaults() {
        let rig = Rig::new();
        let monitor = rig.booted_on_faulty_storage();

        assert_eq!(monitor.thresholds(), ThresholdPair { lower: 512, upper: 532 });
        assert_eq!(rig.main_led.times_lit(), 3);
        assert_eq!(*rig.sampler.events.borrow(), [SamplerEvent::Start]);
    }

    #[test]
    fn test_failed_calibration_write_still_applies_thresholds() {
        let rig = Rig::new();
        let mut monitor = rig.booted_on_faulty_storage();
        rig.reading.submit(400);
        rig.calibrate_button.press();

        let thresholds = block_on(monitor.calibrate());

        assert_eq!(thresholds, ThresholdPair { lower: 410, upper: 430 });
        assert_eq!(monitor.thresholds(), thresholds);
        assert!(!rig.calibration_led.is_on());
        assert!(!rig.reading.is_calibrating());
    }

    #[test]
    fn test_failed_clear_still_reboots_into_defaults() {
        let rig = Rig::new();
        let mut monitor = rig.booted_on_faulty_storage();
        rig.reading.submit(300);
        block_on(monitor.calibrate());
        assert_eq!(monitor.thresholds().lower, 310);

        rig.reset_button.press();
        block_on(monitor.poll());

        assert_eq!(monitor.thresholds(), ThresholdPair::DEFAULT);
        assert!(!monitor.is_flashing());
        assert_eq!(rig.reading.current(), MAX_READING);
        assert_eq!(
            *rig.sampler.events.borrow(),
            [SamplerEvent::Start, SamplerEvent::Stop, SamplerEvent::Start]
        );
    }
}
