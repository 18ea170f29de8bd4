//! Undervoltage monitor: periodic supply sampling and the one-way cutoff latch.
//!
//! While the load is energized the monitor counts wake ticks and, once per
//! measurement interval, powers the sense divider, averages a burst of ADC
//! readings, and powers it back down. A reading strictly below the configured
//! threshold sets the latch, after which the load can never be re-energized
//! short of a full reset.

use core::fmt;

use embedded_hal::delay::DelayNs;

/// Wake ticks between supply measurements.
pub const MEASUREMENT_INTERVAL_TICKS: u32 = 110;
/// Readings are averaged by shifting the sum right by this many bits.
pub const SAMPLE_SHIFT: u8 = 5;
/// Largest accepted shift: 2^16 readings of a 16-bit converter still fit the
/// 32-bit accumulator.
pub const MAX_SAMPLE_SHIFT: u8 = 16;
/// Delay after enabling the divider before the first reading.
pub const LEADING_SETTLE_MS: u32 = 18;
/// Delay after the last reading before the divider is disabled.
pub const TRAILING_SETTLE_MS: u32 = 2;

/// Sampling schedule and protocol parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MonitorConfig {
    pub interval_ticks: u32,
    pub sample_shift: u8,
    pub leading_settle_ms: u32,
    pub trailing_settle_ms: u32,
}

impl MonitorConfig {
    pub const DEFAULT: Self = Self::new(
        MEASUREMENT_INTERVAL_TICKS,
        SAMPLE_SHIFT,
        LEADING_SETTLE_MS,
        TRAILING_SETTLE_MS,
    );

    /// Builds a schedule. `sample_shift` is capped at [`MAX_SAMPLE_SHIFT`].
    #[must_use]
    pub const fn new(
        interval_ticks: u32,
        sample_shift: u8,
        leading_settle_ms: u32,
        trailing_settle_ms: u32,
    ) -> Self {
        let sample_shift = if sample_shift > MAX_SAMPLE_SHIFT {
            MAX_SAMPLE_SHIFT
        } else {
            sample_shift
        };
        Self {
            interval_ticks,
            sample_shift,
            leading_settle_ms,
            trailing_settle_ms,
        }
    }

    /// Number of readings per measurement (always a power of two).
    #[must_use]
    pub const fn sample_count(&self) -> u32 {
        1 << self.effective_shift()
    }

    /// Shift actually applied; fields written directly are capped here too.
    const fn effective_shift(&self) -> u8 {
        if self.sample_shift > MAX_SAMPLE_SHIFT {
            MAX_SAMPLE_SHIFT
        } else {
            self.sample_shift
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Measurement front end: the divider enable line plus one ADC channel.
pub trait SupplySense {
    /// ADC-specific error type.
    type Error;

    /// Connects the sense divider to the supply.
    fn power_up(&mut self);

    /// Takes one raw conversion.
    ///
    /// # Errors
    ///
    /// Returns the converter error when the reading is unavailable.
    fn read_raw(&mut self) -> Result<u16, Self::Error>;

    /// Disconnects the sense divider.
    fn power_down(&mut self);
}

/// One-way undervoltage flag. There is deliberately no way to clear it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UndervoltageLatch {
    tripped: bool,
}

impl UndervoltageLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self { tripped: false }
    }

    /// Sets the latch. Idempotent.
    pub fn trip(&mut self) {
        self.tripped = true;
    }

    #[must_use]
    pub const fn is_tripped(&self) -> bool {
        self.tripped
    }
}

impl fmt::Display for UndervoltageLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.tripped { "tripped" } else { "clear" })
    }
}

/// Runs the sampling protocol and returns the averaged reading.
///
/// The divider is powered down on every path, including a failed read, so a
/// converter fault never leaves the sense network drawing current. Any failed
/// reading discards the whole burst and yields `None`.
pub fn sample_supply<S, D>(sense: &mut S, delay: &mut D, config: &MonitorConfig) -> Option<u16>
where
    S: SupplySense,
    D: DelayNs,
{
    sense.power_up();
    delay.delay_ms(config.leading_settle_ms);

    let mut sum: u32 = 0;
    let mut failed = false;
    for _ in 0..config.sample_count() {
        if let Ok(raw) = sense.read_raw() {
            sum = sum.saturating_add(u32::from(raw));
        } else {
            failed = true;
            break;
        }
    }

    delay.delay_ms(config.trailing_settle_ms);
    sense.power_down();

    if failed {
        return None;
    }

    Some(u16::try_from(sum >> config.effective_shift()).unwrap_or(u16::MAX))
}

/// Result of evaluating the monitor for one wake tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MonitorOutcome {
    /// No measurement was due.
    Idle,
    /// Measurement taken; supply is at or above the threshold.
    Sampled(u16),
    /// Measurement taken below the threshold; the latch is now set.
    Tripped(u16),
    /// Measurement was due but the front end failed; nothing changed.
    SampleFailed,
}

impl MonitorOutcome {
    /// Returns `true` when the load must be cut.
    #[must_use]
    pub const fn requires_cutoff(self) -> bool {
        matches!(self, MonitorOutcome::Tripped(_))
    }
}

/// Stateless evaluator; the counter and the latch live in the controller context.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UndervoltageMonitor {
    config: MonitorConfig,
}

impl UndervoltageMonitor {
    #[must_use]
    pub const fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Returns `true` when a measurement is due for this tick.
    #[must_use]
    pub const fn is_due(&self, counter: u32, load_energized: bool) -> bool {
        load_energized && counter >= self.config.interval_ticks
    }

    /// Evaluates one tick.
    ///
    /// Only runs while the load is energized. When the measurement counter has
    /// reached the interval it restarts from zero and a sample is taken; a
    /// reading strictly below `threshold` trips the latch. A failed sample
    /// still consumes the interval but never trips.
    pub fn evaluate<S, D>(
        &self,
        counter: &mut u32,
        load_energized: bool,
        threshold: u16,
        latch: &mut UndervoltageLatch,
        sense: &mut S,
        delay: &mut D,
    ) -> MonitorOutcome
    where
        S: SupplySense,
        D: DelayNs,
    {
        if !self.is_due(*counter, load_energized) {
            return MonitorOutcome::Idle;
        }

        *counter = 0;

        match sample_supply(sense, delay, &self.config) {
            Some(raw) if raw < threshold => {
                latch.trip();
                MonitorOutcome::Tripped(raw)
            }
            Some(raw) => MonitorOutcome::Sampled(raw),
            None => MonitorOutcome::SampleFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum SenseCall {
        PowerUp,
        Read,
        PowerDown,
    }

    struct ScriptedSense {
        readings: Vec<Result<u16, ()>, 64>,
        cursor: usize,
        calls: Vec<SenseCall, 80>,
    }

    impl ScriptedSense {
        fn constant(raw: u16, count: usize) -> Self {
            let mut readings = Vec::new();
            for _ in 0..count {
                readings.push(Ok(raw)).unwrap();
            }
            Self {
                readings,
                cursor: 0,
                calls: Vec::new(),
            }
        }

        fn reads(&self) -> usize {
            self.calls.iter().filter(|call| **call == SenseCall::Read).count()
        }
    }

    impl SupplySense for ScriptedSense {
        type Error = ();

        fn power_up(&mut self) {
            self.calls.push(SenseCall::PowerUp).unwrap();
        }

        fn read_raw(&mut self) -> Result<u16, Self::Error> {
            self.calls.push(SenseCall::Read).unwrap();
            let reading = self.readings.get(self.cursor).copied().unwrap_or(Err(()));
            self.cursor += 1;
            reading
        }

        fn power_down(&mut self) {
            self.calls.push(SenseCall::PowerDown).unwrap();
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        delays_ms: Vec<u32, 4>,
    }

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, _ns: u32) {}

        fn delay_ms(&mut self, ms: u32) {
            self.delays_ms.push(ms).unwrap();
        }
    }

    #[test]
    fn sampling_protocol_settles_averages_and_powers_down() {
        let mut sense = ScriptedSense::constant(0, 0);
        for index in 0..32u16 {
            sense.readings.push(Ok(700 + index % 2)).unwrap();
        }
        let mut delay = RecordingDelay::default();

        let raw = sample_supply(&mut sense, &mut delay, &MonitorConfig::default());

        // 16 * 700 + 16 * 701 = 22416; 22416 >> 5 = 700
        assert_eq!(raw, Some(700));
        assert_eq!(sense.calls.first(), Some(&SenseCall::PowerUp));
        assert_eq!(sense.calls.last(), Some(&SenseCall::PowerDown));
        assert_eq!(sense.reads(), 32);
        assert_eq!(delay.delays_ms.as_slice(), &[18, 2]);
    }

    struct FullScaleSense;

    impl SupplySense for FullScaleSense {
        type Error = ();

        fn power_up(&mut self) {}

        fn read_raw(&mut self) -> Result<u16, Self::Error> {
            Ok(u16::MAX)
        }

        fn power_down(&mut self) {}
    }

    #[test]
    fn oversized_shift_is_capped() {
        let built = MonitorConfig::new(110, 40, 0, 0);
        assert_eq!(built.sample_shift, MAX_SAMPLE_SHIFT);
        assert_eq!(built.sample_count(), 1 << 16);

        let written = MonitorConfig {
            sample_shift: u8::MAX,
            ..MonitorConfig::default()
        };
        assert_eq!(written.sample_count(), 1 << 16);

        let mut delay = RecordingDelay::default();
        assert_eq!(
            sample_supply(&mut FullScaleSense, &mut delay, &written),
            Some(u16::MAX)
        );
    }

    #[test]
    fn failed_read_aborts_burst_but_still_powers_down() {
        let mut sense = ScriptedSense::constant(800, 3);
        let mut delay = RecordingDelay::default();

        assert_eq!(sample_supply(&mut sense, &mut delay, &MonitorConfig::default()), None);
        assert_eq!(sense.reads(), 4);
        assert_eq!(sense.calls.last(), Some(&SenseCall::PowerDown));
    }

    #[test]
    fn monitor_waits_for_interval_and_resets_counter() {
        let monitor = UndervoltageMonitor::default();
        let mut latch = UndervoltageLatch::new();
        let mut sense = ScriptedSense::constant(800, 32);
        let mut delay = RecordingDelay::default();

        let mut counter = 109;
        let outcome = monitor.evaluate(&mut counter, true, 721, &mut latch, &mut sense, &mut delay);
        assert_eq!(outcome, MonitorOutcome::Idle);
        assert_eq!(counter, 109);
        assert!(sense.calls.is_empty());

        counter = 110;
        let outcome = monitor.evaluate(&mut counter, true, 721, &mut latch, &mut sense, &mut delay);
        assert_eq!(outcome, MonitorOutcome::Sampled(800));
        assert_eq!(counter, 0);
        assert!(!latch.is_tripped());
    }

    #[test]
    fn monitor_never_samples_a_de_energized_load() {
        let monitor = UndervoltageMonitor::default();
        let mut latch = UndervoltageLatch::new();
        let mut sense = ScriptedSense::constant(100, 32);
        let mut delay = RecordingDelay::default();

        let mut counter = 5_000;
        let outcome = monitor.evaluate(&mut counter, false, 721, &mut latch, &mut sense, &mut delay);
        assert_eq!(outcome, MonitorOutcome::Idle);
        assert_eq!(counter, 5_000);
        assert!(!latch.is_tripped());
    }

    #[test]
    fn reading_strictly_below_threshold_trips_latch() {
        let monitor = UndervoltageMonitor::default();
        let mut delay = RecordingDelay::default();

        let mut latch = UndervoltageLatch::new();
        let mut at_threshold = ScriptedSense::constant(721, 32);
        let mut counter = 110;
        monitor.evaluate(&mut counter, true, 721, &mut latch, &mut at_threshold, &mut delay);
        assert!(!latch.is_tripped());

        let mut below = ScriptedSense::constant(700, 32);
        let mut counter = 110;
        let outcome = monitor.evaluate(&mut counter, true, 721, &mut latch, &mut below, &mut delay);
        assert_eq!(outcome, MonitorOutcome::Tripped(700));
        assert!(outcome.requires_cutoff());
        assert!(latch.is_tripped());
    }

    #[test]
    fn failed_sample_consumes_interval_without_tripping() {
        let monitor = UndervoltageMonitor::default();
        let mut latch = UndervoltageLatch::new();
        let mut sense = ScriptedSense::constant(0, 0);
        let mut delay = RecordingDelay::default();

        let mut counter = 110;
        let outcome = monitor.evaluate(&mut counter, true, 721, &mut latch, &mut sense, &mut delay);
        assert_eq!(outcome, MonitorOutcome::SampleFailed);
        assert_eq!(counter, 0);
        assert!(!latch.is_tripped());
    }

    #[test]
    fn custom_shift_changes_burst_length() {
        let config = MonitorConfig::new(4, 2, 0, 0);
        assert_eq!(config.sample_count(), 4);

        let mut sense = ScriptedSense::constant(1_023, 4);
        let mut delay = RecordingDelay::default();
        assert_eq!(sample_supply(&mut sense, &mut delay, &config), Some(1_023));
        assert_eq!(sense.reads(), 4);
    }
}
