//! Controller context: all per-boot state plus the per-tick handler chain.
//!
//! Every counter, the latch, the duty state, and the peripherals the tick
//! handler touches live in one [`Controller`] value that the scheduler owns.
//! Nothing here is shared with interrupt context.

pub mod status;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::config::Configuration;
use crate::duty::{self, DutyState, DutyTransition, LoadLevel};
use crate::monitor::{
    MonitorConfig, MonitorOutcome, SupplySense, UndervoltageLatch, UndervoltageMonitor,
};
use crate::scheduler::{TickHandler, WakeEvent};
use crate::telemetry::{
    LoadTransitionCause, SupplyTelemetry, TELEMETRY_RING_CAPACITY, TelemetryEventKind,
    TelemetryPayload, TelemetryRecorder, WakeInstant,
};

pub use status::{StatusFormatter, StatusSnapshot};

/// The two independent tick counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WakeCounters {
    /// Ticks spent in the current duty phase.
    pub duty: u32,
    /// Ticks since the last supply measurement.
    pub measurement: u32,
}

impl WakeCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duty: 0,
            measurement: 0,
        }
    }

    /// Counts one wake tick on both counters.
    pub fn advance(&mut self) {
        self.duty = self.duty.saturating_add(1);
        self.measurement = self.measurement.saturating_add(1);
    }
}

/// What a single tick did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickReport {
    pub tick: WakeInstant,
    pub monitor: MonitorOutcome,
    pub duty: DutyTransition,
    pub load: LoadLevel,
}

/// Single-owner controller context threaded through the wake loop.
pub struct Controller<L, S, D, const N: usize = TELEMETRY_RING_CAPACITY>
where
    L: OutputPin,
    S: SupplySense,
    D: DelayNs,
{
    config: Configuration,
    monitor: UndervoltageMonitor,
    counters: WakeCounters,
    duty_state: DutyState,
    latch: UndervoltageLatch,
    load_level: LoadLevel,
    last_supply_raw: Option<u16>,
    now: WakeInstant,
    load: L,
    sense: S,
    delay: D,
    telemetry: TelemetryRecorder<N>,
}

impl<L, S, D, const N: usize> Controller<L, S, D, N>
where
    L: OutputPin,
    S: SupplySense,
    D: DelayNs,
{
    /// Brings up the controller: the load is energized and the duty phase is ON.
    #[must_use]
    pub fn boot(
        config: Configuration,
        monitor_config: MonitorConfig,
        load: L,
        sense: S,
        delay: D,
    ) -> Self {
        let mut controller = Self {
            config,
            monitor: UndervoltageMonitor::new(monitor_config),
            counters: WakeCounters::new(),
            duty_state: DutyState::default(),
            latch: UndervoltageLatch::new(),
            load_level: LoadLevel::DeEnergized,
            last_supply_raw: None,
            now: WakeInstant::BOOT,
            load,
            sense,
            delay,
            telemetry: TelemetryRecorder::new(),
        };

        controller.record(TelemetryEventKind::Booted, TelemetryPayload::none());
        controller.drive_load(LoadLevel::Energized, LoadTransitionCause::Boot);
        controller
    }

    /// Runs the handler chain for one wake tick.
    pub fn on_wake(&mut self, event: WakeEvent) -> TickReport {
        self.now = self.now.next();
        if event.disarm_failed {
            self.record(TelemetryEventKind::WakeDisarmFailed, TelemetryPayload::none());
        }

        self.counters.advance();

        let monitor = self.monitor.evaluate(
            &mut self.counters.measurement,
            self.load_level.is_energized(),
            self.config.undervoltage_threshold,
            &mut self.latch,
            &mut self.sense,
            &mut self.delay,
        );
        self.apply_monitor_outcome(monitor);

        let transition = duty::evaluate(
            self.duty_state,
            self.counters.duty,
            &self.config.duty_timings(),
            self.config.feature_mode,
            self.latch.is_tripped(),
        );
        self.duty_state = transition.state;
        if transition.reset_counter {
            self.counters.duty = 0;
        }
        if let Some(level) = transition.load {
            self.drive_load(level, LoadTransitionCause::DutyCycle);
        }

        TickReport {
            tick: self.now,
            monitor,
            duty: transition,
            load: self.load_level,
        }
    }

    /// Overwrites the duty phase from a raw value.
    ///
    /// Unknown values reset to [`DutyState::Off`] and are reported. The load
    /// is left alone; it follows the phase at the next switch.
    pub fn inject_duty_state(&mut self, raw: u8) -> DutyState {
        let state = DutyState::normalize(raw);
        if DutyState::from_raw(raw).is_none() {
            self.record(
                TelemetryEventKind::DutyStateNormalized,
                TelemetryPayload::DutyState(raw),
            );
        }
        self.duty_state = state;
        state
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            now: self.now,
            config: self.config,
            duty_state: self.duty_state,
            duty_counter: self.counters.duty,
            measurement_counter: self.counters.measurement,
            latched: self.latch.is_tripped(),
            load: self.load_level,
            last_supply_raw: self.last_supply_raw,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    #[must_use]
    pub fn counters(&self) -> WakeCounters {
        self.counters
    }

    #[must_use]
    pub fn duty_state(&self) -> DutyState {
        self.duty_state
    }

    #[must_use]
    pub fn load_level(&self) -> LoadLevel {
        self.load_level
    }

    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.latch.is_tripped()
    }

    #[must_use]
    pub fn now(&self) -> WakeInstant {
        self.now
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder<N> {
        &self.telemetry
    }

    pub fn sense_mut(&mut self) -> &mut S {
        &mut self.sense
    }

    pub fn load_mut(&mut self) -> &mut L {
        &mut self.load
    }

    fn apply_monitor_outcome(&mut self, outcome: MonitorOutcome) {
        let threshold = self.config.undervoltage_threshold;
        match outcome {
            MonitorOutcome::Idle => {}
            MonitorOutcome::Sampled(raw) => {
                self.last_supply_raw = Some(raw);
                self.telemetry
                    .record_supply_sample(SupplyTelemetry::new(raw, threshold), self.now);
            }
            MonitorOutcome::Tripped(raw) => {
                self.last_supply_raw = Some(raw);
                self.telemetry
                    .record_supply_sample(SupplyTelemetry::new(raw, threshold), self.now);
                self.drive_load(LoadLevel::DeEnergized, LoadTransitionCause::Undervoltage);
            }
            MonitorOutcome::SampleFailed => {
                self.record(TelemetryEventKind::SampleFailed, TelemetryPayload::none());
            }
        }
    }

    /// Drives the load pin. A pin error is recorded and the logical level is
    /// still updated; there is nothing else to fall back to.
    fn drive_load(&mut self, level: LoadLevel, cause: LoadTransitionCause) {
        let result = match level {
            LoadLevel::Energized => self.load.set_high(),
            LoadLevel::DeEnergized => self.load.set_low(),
        };
        if result.is_err() {
            self.record(TelemetryEventKind::LoadDriveFailed, TelemetryPayload::none());
        }

        self.load_level = level;
        self.telemetry.record_load_transition(level, cause, self.now);
    }

    fn record(&mut self, event: TelemetryEventKind, payload: TelemetryPayload) {
        self.telemetry.record(event, payload, self.now);
    }
}

impl<L, S, D, const N: usize> TickHandler for Controller<L, S, D, N>
where
    L: OutputPin,
    S: SupplySense,
    D: DelayNs,
{
    fn on_wake(&mut self, event: WakeEvent) {
        Controller::on_wake(self, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve;
    use core::convert::Infallible;
    use embedded_hal::digital::{self, ErrorType};

    struct Pin {
        high: bool,
        fail: bool,
    }

    impl ErrorType for Pin {
        type Error = digital::ErrorKind;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            if self.fail {
                return Err(digital::ErrorKind::Other);
            }
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if self.fail {
                return Err(digital::ErrorKind::Other);
            }
            self.high = true;
            Ok(())
        }
    }

    struct FixedSense(u16);

    impl SupplySense for FixedSense {
        type Error = Infallible;

        fn power_up(&mut self) {}

        fn read_raw(&mut self) -> Result<u16, Self::Error> {
            Ok(self.0)
        }

        fn power_down(&mut self) {}
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn controller(supply: u16) -> Controller<Pin, FixedSense, NoDelay, 16> {
        Controller::boot(
            resolve(true, false),
            MonitorConfig::default(),
            Pin {
                high: false,
                fail: false,
            },
            FixedSense(supply),
            NoDelay,
        )
    }

    #[test]
    fn boot_energizes_load_in_on_phase() {
        let controller = controller(900);

        assert_eq!(controller.duty_state(), DutyState::On);
        assert_eq!(controller.load_level(), LoadLevel::Energized);
        let pin_high = controller.load.high;
        assert!(pin_high);

        let events: heapless::Vec<TelemetryEventKind, 4> =
            controller.telemetry().oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[TelemetryEventKind::Booted, TelemetryEventKind::LoadEnergized]
        );
    }

    #[test]
    fn counters_advance_once_per_tick() {
        let mut controller = controller(900);
        for _ in 0..5 {
            controller.on_wake(WakeEvent::default());
        }

        assert_eq!(controller.counters(), WakeCounters { duty: 5, measurement: 5 });
        assert_eq!(controller.now().ticks(), 5);
    }

    #[test]
    fn disarm_failures_are_recorded_and_tick_proceeds() {
        let mut controller = controller(900);
        controller.on_wake(WakeEvent {
            spurious_resumes: 0,
            disarm_failed: true,
        });

        assert_eq!(controller.counters().duty, 1);
        assert!(
            controller
                .telemetry()
                .oldest_first()
                .any(|record| record.event == TelemetryEventKind::WakeDisarmFailed)
        );
    }

    #[test]
    fn pin_failures_keep_the_logical_level() {
        let mut controller = controller(900);
        controller.load_mut().fail = true;
        for _ in 0..7_031 {
            controller.on_wake(WakeEvent::default());
        }

        assert_eq!(controller.load_level(), LoadLevel::DeEnergized);
        assert!(controller.load.high);
        assert!(
            controller
                .telemetry()
                .oldest_first()
                .any(|record| record.event == TelemetryEventKind::LoadDriveFailed)
        );
    }

    #[test]
    fn injected_unknown_state_normalizes_to_off() {
        let mut controller = controller(900);

        assert_eq!(controller.inject_duty_state(9), DutyState::Off);
        assert_eq!(controller.duty_state(), DutyState::Off);
        assert_eq!(controller.load_level(), LoadLevel::Energized);

        let latest = controller.telemetry().latest().copied().unwrap();
        assert_eq!(latest.event, TelemetryEventKind::DutyStateNormalized);
        assert_eq!(latest.details, TelemetryPayload::DutyState(9));
    }

    #[test]
    fn snapshot_reports_last_supply_reading() {
        let mut controller = controller(812);
        for _ in 0..110 {
            controller.on_wake(WakeEvent::default());
        }

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.last_supply_raw, Some(812));
        assert_eq!(snapshot.measurement_counter, 0);
        assert_eq!(snapshot.duty_counter, 110);
        assert!(!snapshot.latched);
    }
}
